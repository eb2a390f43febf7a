//! Per-authorization signing keys.
//!
//! Every exchange mints a fresh 256-bit HMAC key that later signs and
//! verifies request bodies for that authorization. Keys never touch storage
//! in the clear: [`KeyWrapper`] seals them with AES-256-GCM under the
//! configured key-encryption key before they land on a token row, and
//! unseals them on read. Key material is never logged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::AuthError;
use crate::AuthResult;

/// Length of a signing key in bytes.
pub const SIGNING_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Mints fresh per-authorization signing keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningKeyProvider;

impl SigningKeyProvider {
    /// Creates a provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates a fresh 256-bit key from the CSPRNG.
    #[must_use]
    pub fn generate(&self) -> Vec<u8> {
        let mut key = vec![0u8; SIGNING_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

/// Seals and unseals signing keys for storage at rest.
#[derive(Clone)]
pub struct KeyWrapper {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyWrapper").finish_non_exhaustive()
    }
}

impl KeyWrapper {
    /// Creates a wrapper around the given key-encryption key.
    #[must_use]
    pub fn new(kek: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek)),
        }
    }

    /// Wraps a signing key. Output is `nonce || ciphertext`, with a fresh
    /// random nonce per call.
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if the seal operation fails.
    pub fn wrap(&self, key: &[u8]) -> AuthResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, key)
            .map_err(|_| AuthError::key_generation("signing key wrap failed"))?;

        let mut wrapped = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    /// Unwraps a stored signing key.
    ///
    /// # Errors
    ///
    /// Returns `KeyGeneration` if the blob is truncated or fails
    /// authentication (wrong KEK or tampered row).
    pub fn unwrap_key(&self, wrapped: &[u8]) -> AuthResult<Vec<u8>> {
        if wrapped.len() <= NONCE_LEN {
            return Err(AuthError::key_generation("wrapped signing key truncated"));
        }
        let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AuthError::key_generation("signing key unwrap failed"))
    }
}
