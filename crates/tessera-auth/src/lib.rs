//! # tessera-auth
//!
//! Authorization-state persistence engine for the Tessera gateway.
//!
//! This crate provides:
//! - Durable persistence of OAuth 2.0 grants (sessions, tokens, auth codes,
//!   PKCE records) behind narrow storage contracts
//! - Reconstruction of a full authorization from a session id, a token
//!   value, or an issued code
//! - Per-authorization signing keys and the request-integrity envelope
//!   (HMAC-SHA256 body signatures)
//! - Request-freshness and client-fingerprint validation
//! - Axum middleware wiring the guards into the request path
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration
//! - [`session`], [`token`], [`code`], [`pkce`] - Durable grant entities
//! - [`storage`] - Storage contracts and the in-memory store
//! - [`grant`] - Reconstructed grant aggregates and save drafts
//! - [`directory`] - Application directory collaborator
//! - [`correlation`] - Interactive-session correlation
//! - [`reconstructor`] - Grant persistence and reconstruction
//! - [`signing`] - Per-authorization signing keys
//! - [`envelope`] - Request body signing and verification
//! - [`freshness`] - Request-datetime validation
//! - [`fingerprint`] - Client fingerprinting
//! - [`middleware`] - Axum guards for the trust boundary

pub mod code;
pub mod config;
pub mod correlation;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod freshness;
pub mod grant;
pub mod middleware;
pub mod pkce;
pub mod reconstructor;
pub mod session;
pub mod signing;
pub mod storage;
pub mod token;

pub use code::AuthCode;
pub use config::{AuthConfig, FingerprintConfig, IntegrityConfig, TokenDefaults};
pub use correlation::{InMemoryCorrelation, SessionCorrelation};
pub use directory::{
    Application, ApplicationDirectory, AuthMethod, ClientRegistration, GrantType,
    ResolvedTokenSettings, TokenSettings,
};
pub use envelope::{BODY_SIGNATURE_HEADER, IntegrityEnvelope};
pub use error::{AuthError, ErrorCategory};
pub use fingerprint::{ClientFingerprint, ClientFingerprintValidator};
pub use freshness::{Clock, REQUEST_DATETIME_HEADER, RequestFreshnessValidator, SystemClock};
pub use grant::{
    Authorization, CodeDraft, CodeRequestContext, GrantDraft, GrantTokens, IssuedCode, IssuedToken,
    SaveStage, generate_opaque_value,
};
pub use middleware::GuardState;
pub use pkce::{CodeChallengeMethod, PkceRecord};
pub use reconstructor::AuthorizationReconstructor;
pub use session::{AuthFlow, AuthSession, SessionStatus};
pub use signing::{KeyWrapper, SigningKeyProvider};
pub use storage::{
    AuthCodeStore, GrantBatch, GrantStore, InMemoryGrantStore, PkceStore, SessionStore,
    SessionUpdate, TokenStore,
};
pub use token::{TokenRecord, TokenType};

/// Type alias for engine results.
pub type AuthResult<T> = Result<T, AuthError>;
