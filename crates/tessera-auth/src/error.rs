//! Authorization engine error types.
//!
//! This module defines all error types produced by the persistence engine and
//! the request-integrity guards. Lookup misses are *not* errors — operations
//! that can miss return `Ok(None)` — so every variant here represents either a
//! request that must be rejected or a fault that must abort the operation.

use std::fmt;

/// Errors produced by grant persistence, reconstruction, and the
/// integrity/freshness/fingerprint guards.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A store insert did not return the expected row. Fatal, no retry.
    #[error("Creation failed: {what}")]
    CreationFailed {
        /// What could not be created (never includes secret material).
        what: String,
    },

    /// An authorization code was presented after it had already been
    /// consumed. This is a security signal, logged at error severity.
    #[error("Authorization code already consumed")]
    ConsumedCodeReplay,

    /// A body could not be signed — no signing key resolved, or the
    /// primitive failed.
    #[error("Signature failed: {message}")]
    SignatureFailed {
        /// Description of the failure.
        message: String,
    },

    /// A presented signature could not be verified (malformed header,
    /// unresolvable key). A well-formed signature that simply does not match
    /// is reported as a `false` verification result, not this error.
    #[error("Signature verification failed: {message}")]
    VerificationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The request datetime is absent where the guard requires it.
    #[error("Request datetime missing")]
    FreshnessMissing,

    /// The request datetime is outside the application's transit-time
    /// tolerance window.
    #[error("Request datetime outside tolerance window")]
    FreshnessStale,

    /// The fingerprint computed from the request context does not match the
    /// fingerprint bound at token issuance.
    #[error("Client fingerprint mismatch")]
    FingerprintMismatch,

    /// The presented grant, code, or token is invalid for the requested
    /// operation.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The client is unknown or not registered for the operation.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// A per-authorization signing key could not be generated or wrapped.
    /// Fatal for the save that requested it.
    #[error("Key generation failed: {message}")]
    KeyGeneration {
        /// Description of the failure.
        message: String,
    },

    /// An error occurred while reading or writing auth state.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// A store call exceeded its bounded timeout.
    #[error("Storage timeout: {operation}")]
    StorageTimeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `CreationFailed` error.
    #[must_use]
    pub fn creation_failed(what: impl Into<String>) -> Self {
        Self::CreationFailed { what: what.into() }
    }

    /// Creates a new `SignatureFailed` error.
    #[must_use]
    pub fn signature_failed(message: impl Into<String>) -> Self {
        Self::SignatureFailed {
            message: message.into(),
        }
    }

    /// Creates a new `VerificationFailed` error.
    #[must_use]
    pub fn verification_failed(message: impl Into<String>) -> Self {
        Self::VerificationFailed {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGeneration` error.
    #[must_use]
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `StorageTimeout` error.
    #[must_use]
    pub fn storage_timeout(operation: impl Into<String>) -> Self {
        Self::StorageTimeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error rejects the request at the trust
    /// boundary (4xx category).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ConsumedCodeReplay
                | Self::VerificationFailed { .. }
                | Self::FreshnessMissing
                | Self::FreshnessStale
                | Self::FingerprintMismatch
                | Self::InvalidGrant { .. }
                | Self::InvalidClient { .. }
        )
    }

    /// Returns `true` if this is a server-side fault (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::CreationFailed { .. }
                | Self::SignatureFailed { .. }
                | Self::KeyGeneration { .. }
                | Self::Storage { .. }
                | Self::StorageTimeout { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error should be logged as a security signal.
    #[must_use]
    pub fn is_security_signal(&self) -> bool {
        matches!(self, Self::ConsumedCodeReplay | Self::FingerprintMismatch)
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// Boundary rejections all collapse into `invalid_request` /
    /// `invalid_grant` so the response does not reveal which specific check
    /// failed.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::ConsumedCodeReplay | Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::VerificationFailed { .. }
            | Self::FreshnessMissing
            | Self::FreshnessStale
            | Self::FingerprintMismatch => "invalid_request",
            Self::CreationFailed { .. }
            | Self::SignatureFailed { .. }
            | Self::KeyGeneration { .. }
            | Self::Storage { .. }
            | Self::StorageTimeout { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConsumedCodeReplay | Self::FingerprintMismatch => ErrorCategory::Security,
            Self::SignatureFailed { .. } | Self::VerificationFailed { .. } => {
                ErrorCategory::Integrity
            }
            Self::FreshnessMissing | Self::FreshnessStale => ErrorCategory::Freshness,
            Self::InvalidGrant { .. } | Self::InvalidClient { .. } => ErrorCategory::Grant,
            Self::CreationFailed { .. } | Self::Storage { .. } | Self::StorageTimeout { .. } => {
                ErrorCategory::Persistence
            }
            Self::KeyGeneration { .. } => ErrorCategory::Keys,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of engine errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Replay or fingerprint violations — security signals.
    Security,
    /// Body signing/verification failures.
    Integrity,
    /// Request-datetime freshness failures.
    Freshness,
    /// Invalid grants, codes, or clients.
    Grant,
    /// Storage reads/writes and timeouts.
    Persistence,
    /// Signing-key generation and wrapping.
    Keys,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security => write!(f, "security"),
            Self::Integrity => write!(f, "integrity"),
            Self::Freshness => write!(f, "freshness"),
            Self::Grant => write!(f, "grant"),
            Self::Persistence => write!(f, "persistence"),
            Self::Keys => write!(f, "keys"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::creation_failed("token row");
        assert_eq!(err.to_string(), "Creation failed: token row");

        let err = AuthError::ConsumedCodeReplay;
        assert_eq!(err.to_string(), "Authorization code already consumed");

        let err = AuthError::FreshnessStale;
        assert_eq!(
            err.to_string(),
            "Request datetime outside tolerance window"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::ConsumedCodeReplay.is_rejection());
        assert!(AuthError::ConsumedCodeReplay.is_security_signal());
        assert!(!AuthError::ConsumedCodeReplay.is_server_error());

        assert!(AuthError::FreshnessMissing.is_rejection());
        assert!(!AuthError::FreshnessMissing.is_security_signal());

        assert!(AuthError::storage("down").is_server_error());
        assert!(!AuthError::storage("down").is_rejection());

        assert!(AuthError::key_generation("rng").is_server_error());
    }

    #[test]
    fn test_rejections_do_not_leak_which_check_failed() {
        // Every boundary rejection that is not a protocol-level grant error
        // must collapse into the same generic code.
        for err in [
            AuthError::verification_failed("mismatch"),
            AuthError::FreshnessMissing,
            AuthError::FreshnessStale,
            AuthError::FingerprintMismatch,
        ] {
            assert_eq!(err.oauth_error_code(), "invalid_request");
        }
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::ConsumedCodeReplay.category(),
            ErrorCategory::Security
        );
        assert_eq!(
            AuthError::signature_failed("no key").category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            AuthError::storage_timeout("session_by_id").category(),
            ErrorCategory::Persistence
        );
        assert_eq!(ErrorCategory::Security.to_string(), "security");
    }
}
