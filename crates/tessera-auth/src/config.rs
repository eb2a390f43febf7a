//! Engine configuration.
//!
//! All configuration is resolved once at startup into an immutable
//! [`AuthConfig`] value and injected into the components that need it.
//! There is no lazily-initialized default-settings singleton: per-application
//! token settings resolved from the directory fall back to the defaults held
//! here when an application has none configured.
//!
//! # Example (TOML)
//!
//! ```toml
//! [tokens]
//! auth_code_lifetime = "10m"
//! access_token_lifetime = "1h"
//! refresh_token_lifetime = "30d"
//! max_request_transit_time = "30s"
//!
//! [integrity]
//! signature_required = true
//!
//! [fingerprinting]
//! enabled = true
//! referer_disabled = false
//! ```

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Root configuration for the authorization-state engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Default token lifetimes and transit tolerance, used when an
    /// application has no settings of its own.
    pub tokens: TokenDefaults,

    /// Request body integrity configuration.
    pub integrity: IntegrityConfig,

    /// Client fingerprinting configuration.
    pub fingerprinting: FingerprintConfig,

    /// Upper bound on any single store call.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Enable the read-through session cache.
    pub session_cache: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: TokenDefaults::default(),
            integrity: IntegrityConfig::default(),
            fingerprinting: FingerprintConfig::default(),
            store_timeout: Duration::from_secs(5),
            session_cache: true,
        }
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when the key-encryption key is
    /// missing or malformed, or a default key is not valid base64.
    pub fn validate(&self) -> Result<(), AuthError> {
        self.integrity.key_encryption_key()?;
        if let Some(default_key) = &self.integrity.default_signing_key {
            let bytes = STANDARD.decode(default_key).map_err(|_| {
                AuthError::configuration("default signing key is not valid base64")
            })?;
            if bytes.len() < 32 {
                return Err(AuthError::configuration(
                    "default signing key must be at least 256 bits",
                ));
            }
        }
        Ok(())
    }
}

/// Default token lifetimes, applied when the application directory yields no
/// per-application settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenDefaults {
    /// Authorization code lifetime. Codes are short-lived.
    #[serde(with = "humantime_serde")]
    pub auth_code_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Maximum accepted transit time for a signed, timestamped request.
    #[serde(with = "humantime_serde")]
    pub max_request_transit_time: Duration,
}

impl Default for TokenDefaults {
    fn default() -> Self {
        Self {
            auth_code_lifetime: Duration::from_secs(10 * 60),
            access_token_lifetime: Duration::from_secs(60 * 60),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 60 * 60),
            id_token_lifetime: Duration::from_secs(60 * 60),
            max_request_transit_time: Duration::from_secs(30),
        }
    }
}

/// Request-body integrity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Reject requests whose signature header is absent on guarded paths.
    pub signature_required: bool,

    /// Base64 key-encryption key used to wrap per-authorization signing
    /// keys at rest. Must decode to 32 bytes.
    pub key_encryption_key: String,

    /// Base64 signing key used for unauthenticated endpoints where no
    /// bearer token resolves a per-authorization key.
    pub default_signing_key: Option<String>,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            signature_required: false,
            key_encryption_key: String::new(),
            default_signing_key: None,
        }
    }
}

impl IntegrityConfig {
    /// Decodes the key-encryption key.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the key is absent, not base64, or
    /// not exactly 256 bits.
    pub fn key_encryption_key(&self) -> Result<[u8; 32], AuthError> {
        let bytes = STANDARD
            .decode(&self.key_encryption_key)
            .map_err(|_| AuthError::configuration("key-encryption key is not valid base64"))?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| AuthError::configuration("key-encryption key must be exactly 256 bits"))
    }

    /// Decodes the default signing key, if one is configured.
    #[must_use]
    pub fn default_key_bytes(&self) -> Option<Vec<u8>> {
        self.default_signing_key
            .as_ref()
            .and_then(|k| STANDARD.decode(k).ok())
    }
}

/// Client fingerprinting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Enable fingerprint binding and verification.
    pub enabled: bool,

    /// Exclude the Referer host from the fingerprint pre-image. Some
    /// deployments sit behind proxies that strip or rewrite Referer.
    pub referer_disabled: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            referer_disabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_kek() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.integrity.key_encryption_key = STANDARD.encode([7u8; 32]);
        config
    }

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(
            config.tokens.auth_code_lifetime,
            Duration::from_secs(10 * 60)
        );
        assert_eq!(
            config.tokens.max_request_transit_time,
            Duration::from_secs(30)
        );
        assert!(config.session_cache);
        assert!(!config.integrity.signature_required);
    }

    #[test]
    fn test_validate_requires_kek() {
        let config = AuthConfig::default();
        assert!(config.validate().is_err());

        let config = config_with_kek();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_default_key() {
        let mut config = config_with_kek();
        config.integrity.default_signing_key = Some(STANDARD.encode([1u8; 16]));
        assert!(config.validate().is_err());

        config.integrity.default_signing_key = Some(STANDARD.encode([1u8; 32]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = config_with_kek();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AuthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.tokens.refresh_token_lifetime,
            config.tokens.refresh_token_lifetime
        );
        assert_eq!(parsed.integrity.key_encryption_key().unwrap(), [7u8; 32]);
    }
}
