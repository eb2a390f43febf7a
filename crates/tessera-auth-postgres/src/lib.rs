//! PostgreSQL storage backend for tessera-auth.
//!
//! Provides persistent storage for:
//!
//! - Authorization sessions
//! - Token records (codes, access, refresh, id)
//! - Single-use authorization codes
//! - PKCE records
//!
//! [`PostgresGrantStore`] implements the four store contracts plus the
//! atomic [`GrantStore::apply`]: the whole batch runs in one transaction,
//! and the auth-code consumption is a compare-and-set on `consumed_on`.
//!
//! # Example
//!
//! ```ignore
//! use tessera_auth_postgres::PostgresGrantStore;
//!
//! let store = PostgresGrantStore::connect("postgres://localhost/tessera").await?;
//! store.ensure_schema().await?;
//! ```

pub mod code;
pub mod pkce;
pub mod session;
pub mod token;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use tessera_auth::{
    AuthCode, AuthCodeStore, AuthError, AuthResult, AuthSession, GrantBatch, GrantStore,
    PkceRecord, PkceStore, SessionStore, TokenRecord, TokenStore, TokenType,
};

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during grant storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored value could not be mapped back to its domain type.
    #[error("Invalid stored value: {0}")]
    InvalidStoredValue(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidStoredValue` error.
    #[must_use]
    pub fn invalid_stored_value(message: impl Into<String>) -> Self {
        Self::InvalidStoredValue(message.into())
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

fn auth_error(err: StorageError) -> AuthError {
    match err {
        StorageError::Conflict(message) => AuthError::creation_failed(message),
        other => AuthError::storage(other.to_string()),
    }
}

/// Classifies a failed code consumption: the code was either already
/// consumed (a replay, a security signal) or never existed.
async fn replay_or_unknown<'e, E>(executor: E, data: &str) -> AuthResult<AuthError>
where
    E: sqlx_core::executor::Executor<'e, Database = Postgres>,
{
    if code::exists(executor, data).await.map_err(auth_error)? {
        tracing::error!("authorization code replay detected");
        Ok(AuthError::ConsumedCodeReplay)
    } else {
        Ok(AuthError::invalid_grant("unknown authorization code"))
    }
}

// =============================================================================
// PostgreSQL Grant Store
// =============================================================================

/// PostgreSQL-backed grant store.
#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    /// Create a new store with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new store by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new().connect(database_url).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the grant tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx_core::query::query(statement)
                .execute(self.pool.as_ref())
                .await?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS auth_session (
        session_id          UUID PRIMARY KEY,
        application_id      INTEGER NOT NULL,
        subject_id          TEXT NOT NULL,
        scopes              JSONB NOT NULL,
        auth_flow           TEXT NOT NULL,
        client_id           TEXT NOT NULL,
        client_fingerprint  BYTEA,
        branding            TEXT,
        redirect_uri        TEXT,
        status              TEXT NOT NULL,
        created_on          TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auth_token (
        id              UUID PRIMARY KEY,
        session_id      UUID NOT NULL,
        application_id  INTEGER NOT NULL,
        token_type      TEXT NOT NULL,
        opaque          BOOLEAN NOT NULL,
        subject_id      TEXT NOT NULL,
        data            TEXT NOT NULL,
        signing_key     BYTEA,
        created_on      TIMESTAMPTZ NOT NULL,
        expiration      TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS auth_token_session_idx ON auth_token (session_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS auth_token_value_idx ON auth_token (data, token_type)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auth_code (
        data            TEXT PRIMARY KEY,
        session_id      UUID NOT NULL,
        application_id  INTEGER NOT NULL,
        issued_on       TIMESTAMPTZ NOT NULL,
        consumed_on     TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS auth_pkce (
        session_id      UUID PRIMARY KEY,
        application_id  INTEGER NOT NULL,
        data            TEXT NOT NULL,
        algorithm       TEXT NOT NULL,
        redirect_uri    TEXT NOT NULL,
        created_on      TIMESTAMPTZ NOT NULL
    )
    "#,
];

// =============================================================================
// Store contract implementations
// =============================================================================

#[async_trait]
impl SessionStore for PostgresGrantStore {
    async fn create_session(&self, session: &AuthSession) -> AuthResult<AuthSession> {
        session::insert(self.pool.as_ref(), session)
            .await
            .map_err(auth_error)?;
        Ok(session.clone())
    }

    async fn session_by_id(&self, session_id: Uuid) -> AuthResult<Option<AuthSession>> {
        session::by_id(self.pool.as_ref(), session_id)
            .await
            .map_err(auth_error)
    }

    async fn set_branding_and_redirect_uri(
        &self,
        session_id: Uuid,
        branding: Option<&str>,
        redirect_uri: &str,
    ) -> AuthResult<()> {
        session::set_branding_and_redirect_uri(self.pool.as_ref(), session_id, branding, redirect_uri)
            .await
            .map_err(auth_error)
    }

    async fn set_session_inactive(&self, session_id: Uuid) -> AuthResult<()> {
        session::set_inactive(self.pool.as_ref(), session_id)
            .await
            .map_err(auth_error)
    }
}

#[async_trait]
impl TokenStore for PostgresGrantStore {
    async fn create_token(&self, token: &TokenRecord) -> AuthResult<TokenRecord> {
        token::insert(self.pool.as_ref(), token)
            .await
            .map_err(auth_error)?;
        Ok(token.clone())
    }

    async fn token_by_value(
        &self,
        value: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<TokenRecord>> {
        token::by_value(self.pool.as_ref(), value, token_type)
            .await
            .map_err(auth_error)
    }

    async fn live_tokens_by_session(
        &self,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>> {
        token::live_by_session(self.pool.as_ref(), session_id, now)
            .await
            .map_err(auth_error)
    }

    async fn live_tokens_by_application(
        &self,
        application_id: i32,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>> {
        token::live_by_application(self.pool.as_ref(), application_id, at)
            .await
            .map_err(auth_error)
    }
}

#[async_trait]
impl AuthCodeStore for PostgresGrantStore {
    async fn create_code(&self, auth_code: &AuthCode) -> AuthResult<AuthCode> {
        code::insert(self.pool.as_ref(), auth_code)
            .await
            .map_err(auth_error)?;
        Ok(auth_code.clone())
    }

    async fn session_for_code(&self, data: &str) -> AuthResult<Option<Uuid>> {
        code::session_for_code(self.pool.as_ref(), data)
            .await
            .map_err(auth_error)
    }

    async fn consume_code(&self, data: &str) -> AuthResult<OffsetDateTime> {
        match code::try_consume(self.pool.as_ref(), data)
            .await
            .map_err(auth_error)?
        {
            Some(consumed_on) => Ok(consumed_on),
            None => Err(replay_or_unknown(self.pool.as_ref(), data).await?),
        }
    }
}

#[async_trait]
impl PkceStore for PostgresGrantStore {
    async fn create_pkce(&self, record: &PkceRecord) -> AuthResult<PkceRecord> {
        pkce::insert(self.pool.as_ref(), record)
            .await
            .map_err(auth_error)?;
        Ok(record.clone())
    }

    async fn pkce_by_session(&self, session_id: Uuid) -> AuthResult<Option<PkceRecord>> {
        pkce::by_session(self.pool.as_ref(), session_id)
            .await
            .map_err(auth_error)
    }
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    async fn apply(&self, batch: GrantBatch) -> AuthResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| auth_error(StorageError::from(e)))?;

        // The compare-and-set goes first: a replayed code rolls the whole
        // batch back before any row is written.
        if let Some(value) = &batch.consume_code
            && code::try_consume(&mut *tx, value)
                .await
                .map_err(auth_error)?
                .is_none()
        {
            // Dropping the transaction rolls back.
            return Err(replay_or_unknown(&mut *tx, value).await?);
        }
        if let Some(session) = &batch.create_session {
            session::insert(&mut *tx, session).await.map_err(auth_error)?;
        }
        if let Some(update) = &batch.update_session {
            session::set_branding_and_redirect_uri(
                &mut *tx,
                update.session_id,
                update.branding.as_deref(),
                &update.redirect_uri,
            )
            .await
            .map_err(auth_error)?;
        }
        if let Some(auth_code) = &batch.create_code {
            code::insert(&mut *tx, auth_code).await.map_err(auth_error)?;
        }
        if let Some(record) = &batch.create_pkce {
            pkce::insert(&mut *tx, record).await.map_err(auth_error)?;
        }
        for record in &batch.create_tokens {
            token::insert(&mut *tx, record).await.map_err(auth_error)?;
        }

        tx.commit()
            .await
            .map_err(|e| auth_error(StorageError::from(e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::not_found("session 42");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: session 42");
    }

    #[test]
    fn test_conflict_maps_to_creation_failed() {
        let err = auth_error(StorageError::conflict("code already exists"));
        assert!(matches!(err, AuthError::CreationFailed { .. }));
    }

    #[test]
    fn test_database_error_maps_to_storage() {
        let err = auth_error(StorageError::invalid_stored_value("bad auth_flow"));
        assert!(matches!(err, AuthError::Storage { .. }));
    }
}
