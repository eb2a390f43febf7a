//! Grant persistence and reconstruction.
//!
//! The [`AuthorizationReconstructor`] orchestrates the grant store, the
//! application directory, the session-correlation marker, and the signing-key
//! provider. `save` translates a [`GrantDraft`] into one [`GrantBatch`] and
//! applies it atomically; `reconstruct` reassembles an [`Authorization`] from
//! the rows a session owns.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::AuthResult;
use crate::code::AuthCode;
use crate::config::AuthConfig;
use crate::correlation::SessionCorrelation;
use crate::directory::{Application, ApplicationDirectory, GrantType, ResolvedTokenSettings};
use crate::error::AuthError;
use crate::grant::{
    Authorization, CodeRequestContext, GrantDraft, GrantTokens, IssuedCode, IssuedToken, SaveStage,
};
use crate::pkce::PkceRecord;
use crate::session::{AuthFlow, AuthSession, SessionStatus};
use crate::signing::{KeyWrapper, SigningKeyProvider};
use crate::storage::{GrantBatch, GrantStore, SessionUpdate};
use crate::token::{TokenRecord, TokenType};

/// Persists grants and reconstructs them from storage.
pub struct AuthorizationReconstructor {
    store: Arc<dyn GrantStore>,
    directory: Arc<dyn ApplicationDirectory>,
    correlation: Arc<dyn SessionCorrelation>,
    keys: SigningKeyProvider,
    wrapper: KeyWrapper,
    config: AuthConfig,
    // Read-through cache of ACTIVE sessions. Never consulted for the
    // auth-code consumption check.
    session_cache: Option<SessionCache>,
}

/// Read-through session cache with an eviction counter.
///
/// The counter lets a reader detect that an eviction landed between its
/// store load and its cache insert, so a deactivated session is never
/// re-cached as ACTIVE.
struct SessionCache {
    entries: DashMap<Uuid, AuthSession>,
    evictions: AtomicU64,
}

impl SessionCache {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            evictions: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for AuthorizationReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationReconstructor")
            .field("session_cache", &self.session_cache.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthorizationReconstructor {
    /// Creates a reconstructor over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when the key-encryption key in the
    /// configuration is invalid.
    pub fn new(
        store: Arc<dyn GrantStore>,
        directory: Arc<dyn ApplicationDirectory>,
        correlation: Arc<dyn SessionCorrelation>,
        config: AuthConfig,
    ) -> AuthResult<Self> {
        let wrapper = KeyWrapper::new(config.integrity.key_encryption_key()?);
        let session_cache = config.session_cache.then(SessionCache::new);
        Ok(Self {
            store,
            directory,
            correlation,
            keys: SigningKeyProvider::new(),
            wrapper,
            config,
            session_cache,
        })
    }

    /// Persists a draft grant as one atomic batch. Returns the owning
    /// session id.
    ///
    /// # Errors
    ///
    /// - `InvalidClient` when the draft's client id resolves to no
    ///   application.
    /// - `InvalidGrant` when the draft is malformed for its stage, or the
    ///   presented code is unknown.
    /// - [`AuthError::ConsumedCodeReplay`] when the exchange loses the
    ///   code-consumption race.
    /// - `KeyGeneration`, `Storage`, `StorageTimeout` on server-side faults.
    pub async fn save(&self, draft: GrantDraft) -> AuthResult<Uuid> {
        let app = self
            .timed("by_client_id", self.directory.by_client_id(&draft.client_id))
            .await?
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;
        let settings = self.resolved_settings(&app).await?;

        let (session_id, batch) = match draft.stage() {
            SaveStage::Authorization => self.authorization_batch(&draft, &app, &settings).await?,
            SaveStage::Exchange => self.exchange_batch(&draft, &app, &settings).await?,
            SaveStage::Direct => self.direct_batch(&draft, &app, &settings)?,
        };

        let result = self.timed("apply", self.store.apply(batch)).await;
        if let Err(err) = result {
            if err.is_security_signal() {
                error!(client_id = %draft.client_id, category = %err.category(), "grant save rejected");
            }
            return Err(err);
        }

        // The marker is consumed exactly once, after the durable write.
        if draft.stage() == SaveStage::Authorization {
            self.correlation.clear_pending_session();
        }
        self.evict(session_id);

        info!(%session_id, client_id = %draft.client_id, stage = ?draft.stage(), "grant saved");
        Ok(session_id)
    }

    /// Reconstructs the grant owned by a session id.
    pub async fn find_by_id(&self, session_id: Uuid) -> AuthResult<Option<Authorization>> {
        self.reconstruct(session_id).await
    }

    /// Resolves a token value to its session and reconstructs the grant.
    pub async fn find_by_token(
        &self,
        value: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<Authorization>> {
        let record = self
            .timed("token_by_value", self.store.token_by_value(value, token_type))
            .await?;
        match record {
            Some(record) => self.reconstruct(record.session_id).await,
            None => Ok(None),
        }
    }

    /// Reassembles an [`Authorization`] from the rows a session owns.
    ///
    /// Returns `Ok(None)` when the session is missing or inactive, the
    /// application or registration is gone, no live tokens remain, or a
    /// code stage lacks its PKCE context.
    pub async fn reconstruct(&self, session_id: Uuid) -> AuthResult<Option<Authorization>> {
        let Some(session) = self.session(session_id).await? else {
            return Ok(None);
        };
        if !session.is_active() {
            return Ok(None);
        }

        let Some(app) = self
            .timed("by_id", self.directory.by_id(session.application_id))
            .await?
        else {
            return Ok(None);
        };
        let Some(registration) = self
            .timed("client_registration", self.directory.client_registration(app.id))
            .await?
        else {
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        let live = self
            .timed(
                "live_tokens_by_session",
                self.store.live_tokens_by_session(session_id, now),
            )
            .await?;
        if live.is_empty() {
            return Ok(None);
        }

        let access = issued_token(latest(&live, TokenType::Access))?;
        let refresh = issued_token(latest(&live, TokenType::Refresh))?;

        let tokens = if let Some(access) = access {
            match session.auth_flow {
                AuthFlow::AuthorizationCode | AuthFlow::Pkce => {
                    GrantTokens::Exchanged { access, refresh }
                }
                AuthFlow::ClientCredentials => GrantTokens::ClientCredentials { access, refresh },
                AuthFlow::RefreshToken => GrantTokens::RefreshGrant { access, refresh },
            }
        } else {
            let Some(code_row) = latest(&live, TokenType::Code) else {
                return Ok(None);
            };
            let Some(pkce) = self
                .timed("pkce_by_session", self.store.pkce_by_session(session_id))
                .await?
            else {
                debug!(%session_id, "code stage has no pkce record");
                return Ok(None);
            };
            let Some(redirect_uri) = registration.resolve_redirect_uri(&pkce.redirect_uri) else {
                debug!(%session_id, "recorded redirect uri matches no registered uri");
                return Ok(None);
            };
            let Some(code) = issued_code(code_row)? else {
                return Ok(None);
            };
            GrantTokens::CodeOnly {
                code,
                request: CodeRequestContext {
                    client_id: session.client_id.clone(),
                    code_challenge: pkce.data,
                    code_challenge_method: pkce.algorithm,
                    redirect_uri: redirect_uri.to_owned(),
                },
            }
        };

        Ok(Some(Authorization {
            session_id,
            application_id: session.application_id,
            client_id: session.client_id,
            subject_id: session.subject_id,
            scopes: session.scopes,
            auth_flow: session.auth_flow,
            tokens,
        }))
    }

    /// Deactivates a session. The cached copy is evicted before this
    /// returns, so no reader observes a stale ACTIVE session afterwards.
    pub async fn remove(&self, session_id: Uuid) -> AuthResult<()> {
        self.timed(
            "set_session_inactive",
            self.store.set_session_inactive(session_id),
        )
        .await?;
        self.evict(session_id);
        info!(%session_id, "session deactivated");
        Ok(())
    }

    // =========================================================================
    // Save stages
    // =========================================================================

    async fn authorization_batch(
        &self,
        draft: &GrantDraft,
        app: &Application,
        settings: &ResolvedTokenSettings,
    ) -> AuthResult<(Uuid, GrantBatch)> {
        let code = draft
            .code
            .as_ref()
            .ok_or_else(|| AuthError::invalid_grant("authorization stage requires a code"))?;
        let session_id = self
            .correlation
            .pending_session()
            .ok_or_else(|| AuthError::invalid_grant("no pending authorization session"))?;

        // The login flow may already have written the session row; the
        // batch only creates it when it does not exist yet.
        let existing = self
            .timed("session_by_id", self.store.session_by_id(session_id))
            .await?;
        let now = OffsetDateTime::now_utc();
        let session = match existing {
            Some(_) => None,
            None => Some(AuthSession {
                session_id,
                application_id: app.id,
                subject_id: draft.principal.clone(),
                scopes: draft.scopes.clone(),
                auth_flow: app.auth_flow,
                client_id: draft.client_id.clone(),
                client_fingerprint: draft.client_fingerprint.clone(),
                branding: self.correlation.branding(),
                redirect_uri: None,
                status: SessionStatus::Active,
                created_on: now,
            }),
        };

        let code_token = TokenRecord {
            id: Uuid::new_v4(),
            session_id,
            application_id: app.id,
            token_type: TokenType::Code,
            opaque: true,
            subject_id: draft.principal.clone(),
            data: code.value.clone(),
            signing_key: None,
            created_on: now,
            expiration: Some(now + settings.auth_code_lifetime),
        };

        let batch = GrantBatch {
            create_session: session,
            create_code: Some(AuthCode::new(session_id, app.id, code.value.clone())),
            create_pkce: Some(PkceRecord::new(
                session_id,
                app.id,
                code.code_challenge.clone(),
                code.code_challenge_method,
                code.redirect_uri.clone(),
            )),
            create_tokens: vec![code_token],
            ..GrantBatch::default()
        };
        Ok((session_id, batch))
    }

    async fn exchange_batch(
        &self,
        draft: &GrantDraft,
        app: &Application,
        settings: &ResolvedTokenSettings,
    ) -> AuthResult<(Uuid, GrantBatch)> {
        let code = draft
            .code
            .as_ref()
            .ok_or_else(|| AuthError::invalid_grant("exchange stage requires a code"))?;
        let access = draft
            .access_token
            .as_ref()
            .ok_or_else(|| AuthError::invalid_grant("exchange stage requires an access token"))?;

        // The session comes from the presented code, never from the
        // pending marker.
        let session_id = self
            .timed("session_for_code", self.store.session_for_code(&code.value))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown authorization code"))?;
        let session = self
            .timed("session_by_id", self.store.session_by_id(session_id))
            .await?
            .ok_or_else(|| AuthError::invalid_grant("unknown authorization code"))?;
        let pkce = self
            .timed("pkce_by_session", self.store.pkce_by_session(session_id))
            .await?;

        // The branding and redirect URI are write-once; only the first
        // exchange sets them.
        let update = match (session.redirect_uri, pkce) {
            (None, Some(pkce)) => Some(SessionUpdate {
                session_id,
                branding: self.correlation.branding(),
                redirect_uri: pkce.redirect_uri,
            }),
            _ => None,
        };

        let mut batch = GrantBatch {
            consume_code: Some(code.value.clone()),
            update_session: update,
            ..GrantBatch::default()
        };
        self.push_bearer_tokens(
            &mut batch,
            session_id,
            app,
            settings,
            &draft.principal,
            access,
            draft.refresh_token.as_deref(),
        )?;
        Ok((session_id, batch))
    }

    fn direct_batch(
        &self,
        draft: &GrantDraft,
        app: &Application,
        settings: &ResolvedTokenSettings,
    ) -> AuthResult<(Uuid, GrantBatch)> {
        let access = draft
            .access_token
            .as_ref()
            .ok_or_else(|| AuthError::invalid_grant("direct grant requires an access token"))?;

        let auth_flow = match draft.grant_type {
            GrantType::ClientCredentials => AuthFlow::ClientCredentials,
            GrantType::RefreshToken => AuthFlow::RefreshToken,
            GrantType::AuthorizationCode => {
                return Err(AuthError::invalid_grant(
                    "authorization-code grant is not a direct grant",
                ));
            }
        };

        let session = AuthSession::new(
            app.id,
            draft.principal.clone(),
            draft.scopes.clone(),
            auth_flow,
            draft.client_id.clone(),
            draft.client_fingerprint.clone(),
        );
        let session_id = session.session_id;

        let mut batch = GrantBatch {
            create_session: Some(session),
            ..GrantBatch::default()
        };
        self.push_bearer_tokens(
            &mut batch,
            session_id,
            app,
            settings,
            &draft.principal,
            access,
            draft.refresh_token.as_deref(),
        )?;
        Ok((session_id, batch))
    }

    /// Mints the per-authorization signing key and appends ACCESS (and
    /// optionally REFRESH) rows carrying it wrapped.
    #[allow(clippy::too_many_arguments)]
    fn push_bearer_tokens(
        &self,
        batch: &mut GrantBatch,
        session_id: Uuid,
        app: &Application,
        settings: &ResolvedTokenSettings,
        principal: &str,
        access: &str,
        refresh: Option<&str>,
    ) -> AuthResult<()> {
        let signing_key = self.keys.generate();
        let now = OffsetDateTime::now_utc();

        batch.create_tokens.push(TokenRecord {
            id: Uuid::new_v4(),
            session_id,
            application_id: app.id,
            token_type: TokenType::Access,
            opaque: true,
            subject_id: principal.to_owned(),
            data: access.to_owned(),
            signing_key: Some(self.wrapper.wrap(&signing_key)?),
            created_on: now,
            expiration: Some(now + settings.access_token_lifetime),
        });

        if let Some(refresh) = refresh {
            batch.create_tokens.push(TokenRecord {
                id: Uuid::new_v4(),
                session_id,
                application_id: app.id,
                token_type: TokenType::Refresh,
                opaque: true,
                subject_id: principal.to_owned(),
                data: refresh.to_owned(),
                signing_key: Some(self.wrapper.wrap(&signing_key)?),
                created_on: now,
                expiration: Some(now + settings.refresh_token_lifetime),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Collaborator plumbing
    // =========================================================================

    async fn resolved_settings(&self, app: &Application) -> AuthResult<ResolvedTokenSettings> {
        let settings = self
            .timed(
                "token_settings",
                self.directory.token_settings(app.org_id, app.id),
            )
            .await?
            .unwrap_or_default();
        Ok(settings.resolve(&self.config.tokens))
    }

    async fn session(&self, session_id: Uuid) -> AuthResult<Option<AuthSession>> {
        let snapshot = match &self.session_cache {
            Some(cache) => {
                if let Some(session) = cache.entries.get(&session_id) {
                    return Ok(Some(session.clone()));
                }
                cache.evictions.load(Ordering::SeqCst)
            }
            None => 0,
        };
        let session = self
            .timed("session_by_id", self.store.session_by_id(session_id))
            .await?;
        if let (Some(cache), Some(session)) = (&self.session_cache, &session)
            && session.is_active()
        {
            cache.entries.insert(session_id, session.clone());
            // An eviction may have landed between the store load and the
            // insert; the copy just cached may already be stale.
            if cache.evictions.load(Ordering::SeqCst) != snapshot {
                cache.entries.remove(&session_id);
            }
        }
        Ok(session)
    }

    fn evict(&self, session_id: Uuid) {
        if let Some(cache) = &self.session_cache {
            // Counter first: racing readers re-check it after inserting.
            cache.evictions.fetch_add(1, Ordering::SeqCst);
            cache.entries.remove(&session_id);
        }
    }

    /// Bounds any single store or directory call.
    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = AuthResult<T>>,
    ) -> AuthResult<T> {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| AuthError::storage_timeout(operation))?
    }
}

fn latest<'a>(tokens: &'a [TokenRecord], token_type: TokenType) -> Option<&'a TokenRecord> {
    tokens
        .iter()
        .filter(|t| t.token_type == token_type)
        .max_by_key(|t| t.created_on)
}

fn issued_token(record: Option<&TokenRecord>) -> AuthResult<Option<IssuedToken>> {
    record
        .map(|record| {
            let expires_at = record
                .expiration
                .ok_or_else(|| AuthError::internal("live token row without expiration"))?;
            Ok(IssuedToken {
                value: record.data.clone(),
                issued_at: record.created_on,
                expires_at,
            })
        })
        .transpose()
}

fn issued_code(record: &TokenRecord) -> AuthResult<Option<IssuedCode>> {
    let expires_at = record
        .expiration
        .ok_or_else(|| AuthError::internal("live code row without expiration"))?;
    Ok(Some(IssuedCode {
        value: record.data.clone(),
        issued_at: record.created_on,
        expires_at,
    }))
}
