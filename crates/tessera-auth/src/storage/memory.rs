//! In-memory grant store.
//!
//! Backs tests and embedded deployments. A single mutex guards all four
//! tables, so [`GrantStore::apply`] is trivially atomic and the auth-code
//! compare-and-set serializes with every other write.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::AuthResult;
use crate::code::AuthCode;
use crate::pkce::PkceRecord;
use crate::session::{AuthSession, SessionStatus};
use crate::token::{TokenRecord, TokenType};

use super::{
    AuthCodeStore, GrantBatch, GrantStore, PkceStore, SessionStore, TokenStore,
};

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<Uuid, AuthSession>,
    tokens: Vec<TokenRecord>,
    codes: HashMap<String, AuthCode>,
    pkce: HashMap<Uuid, PkceRecord>,
}

/// In-memory implementation of all four store contracts.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    tables: Mutex<Tables>,
}

impl InMemoryGrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("grant store lock poisoned")
    }
}

impl Tables {
    fn consume(&mut self, data: &str, now: OffsetDateTime) -> AuthResult<OffsetDateTime> {
        let code = self
            .codes
            .get_mut(data)
            .ok_or_else(|| AuthError::invalid_grant("unknown authorization code"))?;
        if code.consumed_on.is_some() {
            return Err(AuthError::ConsumedCodeReplay);
        }
        code.consumed_on = Some(now);
        Ok(now)
    }
}

#[async_trait]
impl SessionStore for InMemoryGrantStore {
    async fn create_session(&self, session: &AuthSession) -> AuthResult<AuthSession> {
        let mut tables = self.lock();
        if tables.sessions.contains_key(&session.session_id) {
            return Err(AuthError::creation_failed("session already exists"));
        }
        tables.sessions.insert(session.session_id, session.clone());
        Ok(session.clone())
    }

    async fn session_by_id(&self, session_id: Uuid) -> AuthResult<Option<AuthSession>> {
        Ok(self.lock().sessions.get(&session_id).cloned())
    }

    async fn set_branding_and_redirect_uri(
        &self,
        session_id: Uuid,
        branding: Option<&str>,
        redirect_uri: &str,
    ) -> AuthResult<()> {
        let mut tables = self.lock();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AuthError::storage("session not found"))?;
        // Write-once fields.
        if session.redirect_uri.is_some() {
            return Err(AuthError::storage("redirect URI already set"));
        }
        session.branding = branding.map(ToOwned::to_owned);
        session.redirect_uri = Some(redirect_uri.to_owned());
        Ok(())
    }

    async fn set_session_inactive(&self, session_id: Uuid) -> AuthResult<()> {
        let mut tables = self.lock();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AuthError::storage("session not found"))?;
        session.status = SessionStatus::Inactive;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for InMemoryGrantStore {
    async fn create_token(&self, token: &TokenRecord) -> AuthResult<TokenRecord> {
        self.lock().tokens.push(token.clone());
        Ok(token.clone())
    }

    async fn token_by_value(
        &self,
        value: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<TokenRecord>> {
        let tables = self.lock();
        Ok(tables
            .tokens
            .iter()
            .filter(|t| t.token_type == token_type && t.data == value)
            .max_by_key(|t| t.created_on)
            .cloned())
    }

    async fn live_tokens_by_session(
        &self,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>> {
        let tables = self.lock();
        Ok(tables
            .tokens
            .iter()
            .filter(|t| t.session_id == session_id && t.is_live(now))
            .cloned()
            .collect())
    }

    async fn live_tokens_by_application(
        &self,
        application_id: i32,
        at: OffsetDateTime,
    ) -> AuthResult<Vec<TokenRecord>> {
        let tables = self.lock();
        Ok(tables
            .tokens
            .iter()
            .filter(|t| {
                t.application_id == application_id
                    && t.token_type == TokenType::Access
                    && t.created_on <= at
                    && t.is_live(at)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuthCodeStore for InMemoryGrantStore {
    async fn create_code(&self, code: &AuthCode) -> AuthResult<AuthCode> {
        let mut tables = self.lock();
        if tables.codes.contains_key(&code.data) {
            return Err(AuthError::creation_failed("auth code already exists"));
        }
        tables.codes.insert(code.data.clone(), code.clone());
        Ok(code.clone())
    }

    async fn session_for_code(&self, data: &str) -> AuthResult<Option<Uuid>> {
        Ok(self.lock().codes.get(data).map(|c| c.session_id))
    }

    async fn consume_code(&self, data: &str) -> AuthResult<OffsetDateTime> {
        self.lock().consume(data, OffsetDateTime::now_utc())
    }
}

#[async_trait]
impl PkceStore for InMemoryGrantStore {
    async fn create_pkce(&self, record: &PkceRecord) -> AuthResult<PkceRecord> {
        let mut tables = self.lock();
        if tables.pkce.contains_key(&record.session_id) {
            return Err(AuthError::creation_failed("pkce record already exists"));
        }
        tables.pkce.insert(record.session_id, record.clone());
        Ok(record.clone())
    }

    async fn pkce_by_session(&self, session_id: Uuid) -> AuthResult<Option<PkceRecord>> {
        Ok(self.lock().pkce.get(&session_id).cloned())
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn apply(&self, batch: GrantBatch) -> AuthResult<()> {
        let mut tables = self.lock();

        // Validate everything that can fail before touching any table, so a
        // rejected batch leaves no partial state. The code check comes
        // first: a replayed code must surface as a replay, whatever else the
        // batch carries.
        if let Some(value) = &batch.consume_code {
            match tables.codes.get(value) {
                None => return Err(AuthError::invalid_grant("unknown authorization code")),
                Some(code) if code.is_consumed() => return Err(AuthError::ConsumedCodeReplay),
                Some(_) => {}
            }
        }
        if let Some(session) = &batch.create_session
            && tables.sessions.contains_key(&session.session_id)
        {
            return Err(AuthError::creation_failed("session already exists"));
        }
        if let Some(update) = &batch.update_session {
            match tables.sessions.get(&update.session_id) {
                None => return Err(AuthError::storage("session not found")),
                Some(s) if s.redirect_uri.is_some() => {
                    return Err(AuthError::storage("redirect URI already set"));
                }
                Some(_) => {}
            }
        }
        if let Some(code) = &batch.create_code
            && tables.codes.contains_key(&code.data)
        {
            return Err(AuthError::creation_failed("auth code already exists"));
        }
        if let Some(record) = &batch.create_pkce
            && tables.pkce.contains_key(&record.session_id)
        {
            return Err(AuthError::creation_failed("pkce record already exists"));
        }

        if let Some(value) = &batch.consume_code {
            tables.consume(value, OffsetDateTime::now_utc())?;
        }
        if let Some(session) = batch.create_session {
            tables.sessions.insert(session.session_id, session);
        }
        if let Some(update) = batch.update_session
            && let Some(session) = tables.sessions.get_mut(&update.session_id)
        {
            session.branding = update.branding;
            session.redirect_uri = Some(update.redirect_uri);
        }
        if let Some(code) = batch.create_code {
            tables.codes.insert(code.data.clone(), code);
        }
        if let Some(record) = batch.create_pkce {
            tables.pkce.insert(record.session_id, record);
        }
        tables.tokens.extend(batch.create_tokens);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::session::AuthFlow;

    fn session() -> AuthSession {
        AuthSession::new(
            1,
            "alice",
            BTreeSet::new(),
            AuthFlow::Pkce,
            "web-client",
            None,
        )
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let store = InMemoryGrantStore::new();
        let created = session();
        store.create_session(&created).await.unwrap();

        let loaded = store
            .session_by_id(created.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.is_active());

        store.set_session_inactive(created.session_id).await.unwrap();
        let loaded = store
            .session_by_id(created.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!loaded.is_active());
    }

    #[tokio::test]
    async fn test_branding_is_write_once() {
        let store = InMemoryGrantStore::new();
        let created = session();
        store.create_session(&created).await.unwrap();

        store
            .set_branding_and_redirect_uri(
                created.session_id,
                Some("acme"),
                "https://app.example.com/cb",
            )
            .await
            .unwrap();
        let second = store
            .set_branding_and_redirect_uri(created.session_id, Some("other"), "https://evil")
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_consume_code_exactly_once() {
        let store = InMemoryGrantStore::new();
        let code = AuthCode::new(Uuid::new_v4(), 1, "code-value");
        store.create_code(&code).await.unwrap();

        assert!(store.consume_code("code-value").await.is_ok());
        assert!(matches!(
            store.consume_code("code-value").await,
            Err(AuthError::ConsumedCodeReplay)
        ));
        assert!(matches!(
            store.consume_code("missing").await,
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_one_winner() {
        let store = Arc::new(InMemoryGrantStore::new());
        let code = AuthCode::new(Uuid::new_v4(), 1, "contested");
        store.create_code(&code).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_code("contested").await
            }));
        }

        let mut wins = 0;
        let mut replays = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuthError::ConsumedCodeReplay) => replays += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(replays, 15);
    }

    #[tokio::test]
    async fn test_failed_batch_writes_nothing() {
        let store = InMemoryGrantStore::new();
        let code = AuthCode::new(Uuid::new_v4(), 1, "used-code");
        store.create_code(&code).await.unwrap();
        store.consume_code("used-code").await.unwrap();

        // A batch that both consumes an already-used code and inserts a
        // token must not write the token.
        let token = TokenRecord {
            id: Uuid::new_v4(),
            session_id: code.session_id,
            application_id: 1,
            token_type: TokenType::Access,
            opaque: false,
            subject_id: "alice".into(),
            data: "should-not-land".into(),
            signing_key: None,
            created_on: OffsetDateTime::now_utc(),
            expiration: Some(OffsetDateTime::now_utc() + time::Duration::hours(1)),
        };

        let batch = GrantBatch {
            consume_code: Some("used-code".into()),
            create_tokens: vec![token],
            ..GrantBatch::default()
        };
        assert!(matches!(
            store.apply(batch).await,
            Err(AuthError::ConsumedCodeReplay)
        ));

        let found = store
            .token_by_value("should-not-land", TokenType::Access)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_live_tokens_by_session_excludes_expired() {
        let store = InMemoryGrantStore::new();
        let session_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        for (value, expiration) in [
            ("live", Some(now + time::Duration::hours(1))),
            ("dead", Some(now - time::Duration::hours(1))),
            ("never", None),
        ] {
            let token = TokenRecord {
                id: Uuid::new_v4(),
                session_id,
                application_id: 1,
                token_type: TokenType::Access,
                opaque: false,
                subject_id: "alice".into(),
                data: value.into(),
                signing_key: None,
                created_on: now,
                expiration,
            };
            store.create_token(&token).await.unwrap();
        }

        let live = store.live_tokens_by_session(session_id, now).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].data, "live");
    }
}
