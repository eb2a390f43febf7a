//! Storage contracts for grant state.
//!
//! Four narrow CRUD contracts — sessions, tokens, auth codes, PKCE records —
//! plus the [`GrantStore`] supertrait that applies one [`GrantBatch`]
//! atomically. The relational backend is the sole arbiter of truth; caches
//! may shadow reads but must never stand in for the auth-code consumption
//! check.
//!
//! # Implementation notes
//!
//! - `apply` must be all-or-nothing: a crash mid-batch must not leave
//!   partial grant state. The PostgreSQL adapter wraps it in one
//!   transaction; the in-memory store holds one lock across the batch.
//! - Auth-code consumption is a single compare-and-set on `consumed_on`.
//!   Concurrent exchanges of the same code get exactly one winner; losers
//!   see [`AuthError::ConsumedCodeReplay`].
//! - Sessions are never deleted. Deactivation is an update.
//! - Never log code or token values.

pub mod memory;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::code::AuthCode;
use crate::pkce::PkceRecord;
use crate::session::AuthSession;
use crate::token::{TokenRecord, TokenType};

pub use memory::InMemoryGrantStore;

/// Session persistence contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session row.
    ///
    /// # Errors
    ///
    /// Returns `CreationFailed` if the insert did not yield the row.
    async fn create_session(&self, session: &AuthSession) -> AuthResult<AuthSession>;

    /// Loads a session by id, regardless of status.
    async fn session_by_id(&self, session_id: Uuid) -> AuthResult<Option<AuthSession>>;

    /// Writes the branding label and redirect URI captured at the exchange
    /// transition. Write-once: implementations must not overwrite values
    /// already set.
    async fn set_branding_and_redirect_uri(
        &self,
        session_id: Uuid,
        branding: Option<&str>,
        redirect_uri: &str,
    ) -> AuthResult<()>;

    /// Flips the session to INACTIVE. Terminal.
    async fn set_session_inactive(&self, session_id: Uuid) -> AuthResult<()>;
}

/// Token persistence contract.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Creates a token row.
    ///
    /// # Errors
    ///
    /// Returns `CreationFailed` if the insert did not yield the row.
    async fn create_token(&self, token: &TokenRecord) -> AuthResult<TokenRecord>;

    /// Looks up the latest live row holding the given value and type.
    async fn token_by_value(
        &self,
        value: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<TokenRecord>>;

    /// Lists all rows for a session that are live at `now`.
    async fn live_tokens_by_session(
        &self,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>>;

    /// Lists access rows for an application that were live at the given
    /// instant. Used to verify signatures when only the client is known.
    async fn live_tokens_by_application(
        &self,
        application_id: i32,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>>;
}

/// Auth-code persistence contract.
#[async_trait]
pub trait AuthCodeStore: Send + Sync {
    /// Creates an auth-code row.
    ///
    /// # Errors
    ///
    /// Returns `CreationFailed` if the insert did not yield the row.
    async fn create_code(&self, code: &AuthCode) -> AuthResult<AuthCode>;

    /// Resolves the session owning a code value.
    async fn session_for_code(&self, data: &str) -> AuthResult<Option<Uuid>>;

    /// Atomically marks a code consumed (`consumed_on IS NULL` → now).
    ///
    /// This check must always hit the backing store, never a cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConsumedCodeReplay`] if the code was already
    /// consumed, `InvalidGrant` if it does not exist.
    ///
    /// [`AuthError::ConsumedCodeReplay`]: crate::AuthError::ConsumedCodeReplay
    async fn consume_code(&self, data: &str) -> AuthResult<OffsetDateTime>;
}

/// PKCE persistence contract.
#[async_trait]
pub trait PkceStore: Send + Sync {
    /// Creates a PKCE record.
    ///
    /// # Errors
    ///
    /// Returns `CreationFailed` if the insert did not yield the row.
    async fn create_pkce(&self, record: &PkceRecord) -> AuthResult<PkceRecord>;

    /// Loads the PKCE record for a session.
    async fn pkce_by_session(&self, session_id: Uuid) -> AuthResult<Option<PkceRecord>>;
}

/// Write-once session fields captured at the exchange transition.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    /// Session to update.
    pub session_id: Uuid,
    /// Branding label from the interactive login session.
    pub branding: Option<String>,
    /// Redirect URI from the authorization request.
    pub redirect_uri: String,
}

/// The full row set one `save` writes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct GrantBatch {
    /// Session to insert (direct grants).
    pub create_session: Option<AuthSession>,
    /// Write-once session update (authorization stage).
    pub update_session: Option<SessionUpdate>,
    /// Code value to consume via compare-and-set (exchange stage).
    pub consume_code: Option<String>,
    /// Auth-code row to insert (authorization stage).
    pub create_code: Option<AuthCode>,
    /// PKCE record to insert (authorization stage).
    pub create_pkce: Option<PkceRecord>,
    /// Token rows to insert.
    pub create_tokens: Vec<TokenRecord>,
}

impl GrantBatch {
    /// Returns `true` if the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create_session.is_none()
            && self.update_session.is_none()
            && self.consume_code.is_none()
            && self.create_code.is_none()
            && self.create_pkce.is_none()
            && self.create_tokens.is_empty()
    }
}

/// Combined grant store: the four contracts plus the atomic batch write.
#[async_trait]
pub trait GrantStore: SessionStore + TokenStore + AuthCodeStore + PkceStore {
    /// Applies a batch atomically: either every row lands or none does.
    ///
    /// # Errors
    ///
    /// Returns `ConsumedCodeReplay` when the batch's compare-and-set loses,
    /// `CreationFailed`/`Storage` on write failures. On any error nothing
    /// is persisted.
    async fn apply(&self, batch: GrantBatch) -> AuthResult<()>;
}
