//! Request-integrity envelope.
//!
//! Guarded requests carry an HMAC-SHA256 signature of the raw body in the
//! `x-body-signature` header, keyed with the per-authorization signing key
//! minted at token issuance. The envelope resolves the key from the
//! presented bearer token's access record (unwrapping the stored blob), or
//! falls back to the configured default key on unauthenticated endpoints.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::warn;

use crate::AuthResult;
use crate::config::IntegrityConfig;
use crate::error::AuthError;
use crate::signing::KeyWrapper;
use crate::storage::TokenStore;
use crate::token::TokenType;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 body signature.
pub const BODY_SIGNATURE_HEADER: &str = "x-body-signature";

/// Signs and verifies request bodies.
pub struct IntegrityEnvelope {
    tokens: Arc<dyn TokenStore>,
    wrapper: KeyWrapper,
    default_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for IntegrityEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityEnvelope").finish_non_exhaustive()
    }
}

impl IntegrityEnvelope {
    /// Creates an envelope over the given token store and integrity
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the key-encryption key is invalid.
    pub fn new(tokens: Arc<dyn TokenStore>, integrity: &IntegrityConfig) -> AuthResult<Self> {
        Ok(Self {
            tokens,
            wrapper: KeyWrapper::new(integrity.key_encryption_key()?),
            default_key: integrity.default_key_bytes(),
        })
    }

    /// Resolves the signing key for a request: the key bound to the bearer
    /// access token when one is presented, otherwise the default key.
    async fn resolve_key(&self, bearer: Option<&str>) -> AuthResult<Vec<u8>> {
        if let Some(value) = bearer {
            let record = self
                .tokens
                .token_by_value(value, TokenType::Access)
                .await?;
            if let Some(record) = record
                && let Some(wrapped) = &record.signing_key
            {
                return self.wrapper.unwrap_key(wrapped);
            }
        }
        self.default_key
            .clone()
            .ok_or_else(|| AuthError::signature_failed("no signing key resolved for request"))
    }

    /// Computes the base64 HMAC-SHA256 signature of a body.
    ///
    /// # Errors
    ///
    /// Returns `SignatureFailed` when no key can be resolved.
    pub async fn sign_body(&self, bearer: Option<&str>, body: &[u8]) -> AuthResult<String> {
        let key = self.resolve_key(bearer).await?;
        Ok(STANDARD.encode(hmac_digest(&key, body)))
    }

    /// Verifies a presented signature against the body, in constant time.
    /// Returns `Ok(false)` on a well-formed signature that does not match.
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` if the header is not valid base64, or
    /// `SignatureFailed` if no key can be resolved.
    pub async fn verify_signature(
        &self,
        bearer: Option<&str>,
        body: &[u8],
        signature: &str,
    ) -> AuthResult<bool> {
        let presented = STANDARD
            .decode(signature)
            .map_err(|_| AuthError::verification_failed("signature header is not valid base64"))?;
        let key = self.resolve_key(bearer).await?;
        Ok(hmac_verify(&key, body, &presented))
    }

    /// Verifies a signature knowing only the client's application, trying
    /// the signing key of every access token live at the request datetime.
    /// Used where no bearer token accompanies the request.
    pub async fn verify_for_application(
        &self,
        application_id: i32,
        at: OffsetDateTime,
        body: &[u8],
        signature: &str,
    ) -> AuthResult<bool> {
        let presented = STANDARD
            .decode(signature)
            .map_err(|_| AuthError::verification_failed("signature header is not valid base64"))?;

        let candidates = self.tokens.live_tokens_by_application(application_id, at).await?;
        for record in &candidates {
            let Some(wrapped) = &record.signing_key else {
                continue;
            };
            let key = self.wrapper.unwrap_key(wrapped)?;
            if hmac_verify(&key, body, &presented) {
                return Ok(true);
            }
        }
        warn!(application_id, "body signature matched no live token key");
        Ok(false)
    }
}

fn hmac_digest(key: &[u8], body: &[u8]) -> Vec<u8> {
    // HMAC accepts any key length.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_verify(key: &[u8], body: &[u8], presented: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(presented).is_ok()
}
