//! End-to-end grant lifecycle tests against the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use uuid::Uuid;

use tessera_auth::{
    Application, ApplicationDirectory, AuthConfig, AuthError, AuthFlow, AuthMethod,
    AuthorizationReconstructor, ClientFingerprint, ClientFingerprintValidator, ClientRegistration,
    CodeChallengeMethod, CodeDraft, FingerprintConfig, GrantDraft, GrantTokens, GrantType,
    AuthResult, InMemoryCorrelation, InMemoryGrantStore, IntegrityConfig, IntegrityEnvelope,
    SessionCorrelation, SessionStore, TokenSettings, TokenType, generate_opaque_value,
};

struct StaticDirectory {
    app: Application,
    registration: ClientRegistration,
}

#[async_trait]
impl ApplicationDirectory for StaticDirectory {
    async fn by_client_id(&self, client_id: &str) -> AuthResult<Option<Application>> {
        Ok((client_id == self.app.client_id).then(|| self.app.clone()))
    }

    async fn by_id(&self, id: i32) -> AuthResult<Option<Application>> {
        Ok((id == self.app.id).then(|| self.app.clone()))
    }

    async fn token_settings(&self, _: i32, _: i32) -> AuthResult<Option<TokenSettings>> {
        Ok(None)
    }

    async fn client_registration(&self, app_id: i32) -> AuthResult<Option<ClientRegistration>> {
        Ok((app_id == self.app.id).then(|| self.registration.clone()))
    }
}

struct Harness {
    store: Arc<InMemoryGrantStore>,
    correlation: Arc<InMemoryCorrelation>,
    reconstructor: AuthorizationReconstructor,
    config: AuthConfig,
}

fn harness() -> Harness {
    let app = Application {
        id: 1,
        org_id: 10,
        client_id: "web".into(),
        auth_flow: AuthFlow::Pkce,
    };
    let registration = ClientRegistration {
        client_id: "web".into(),
        redirect_uris: ["https://app.example.com/cb".to_string()]
            .into_iter()
            .collect(),
        grant_types: [
            GrantType::AuthorizationCode,
            GrantType::ClientCredentials,
            GrantType::RefreshToken,
        ]
        .into_iter()
        .collect(),
        auth_methods: vec![AuthMethod::None],
    };

    let mut config = AuthConfig::default();
    config.integrity.key_encryption_key = STANDARD.encode([7u8; 32]);

    let store = Arc::new(InMemoryGrantStore::new());
    let correlation = Arc::new(InMemoryCorrelation::new());
    let reconstructor = AuthorizationReconstructor::new(
        Arc::clone(&store) as Arc<dyn tessera_auth::GrantStore>,
        Arc::new(StaticDirectory { app, registration }),
        Arc::clone(&correlation) as Arc<dyn SessionCorrelation>,
        config.clone(),
    )
    .unwrap();

    Harness {
        store,
        correlation,
        reconstructor,
        config,
    }
}

fn scopes() -> BTreeSet<String> {
    ["openid".to_string(), "profile".to_string()]
        .into_iter()
        .collect()
}

fn authorization_draft(code: &str) -> GrantDraft {
    GrantDraft {
        client_id: "web".into(),
        grant_type: GrantType::AuthorizationCode,
        principal: "alice".into(),
        scopes: scopes(),
        code: Some(CodeDraft {
            value: code.into(),
            code_challenge: "challenge".into(),
            code_challenge_method: CodeChallengeMethod::S256,
            redirect_uri: "https://app.example.com/cb".into(),
        }),
        access_token: None,
        refresh_token: None,
        client_fingerprint: None,
    }
}

fn exchange_draft(code: &str, access: &str, refresh: Option<&str>) -> GrantDraft {
    GrantDraft {
        access_token: Some(access.into()),
        refresh_token: refresh.map(Into::into),
        ..authorization_draft(code)
    }
}

#[tokio::test]
async fn authorization_code_scenario() {
    let h = harness();
    h.correlation.set_pending_session(Uuid::new_v4());

    let code = generate_opaque_value();
    let session_id = h
        .reconstructor
        .save(authorization_draft(&code))
        .await
        .unwrap();

    // Before the exchange the grant shows only the code, with the request
    // context rebuilt from the PKCE record and the registration.
    let auth = h.reconstructor.find_by_id(session_id).await.unwrap().unwrap();
    match &auth.tokens {
        GrantTokens::CodeOnly { code: issued, request } => {
            assert_eq!(issued.value, code);
            assert_eq!(request.client_id, "web");
            assert_eq!(request.code_challenge, "challenge");
            assert_eq!(request.code_challenge_method, CodeChallengeMethod::S256);
            assert_eq!(request.redirect_uri, "https://app.example.com/cb");
            assert!(issued.expires_at > issued.issued_at);
        }
        other => panic!("expected code stage, got {other:?}"),
    }
    assert_eq!(auth.scopes, scopes());

    let access = generate_opaque_value();
    let refresh = generate_opaque_value();
    h.reconstructor
        .save(exchange_draft(&code, &access, Some(&refresh)))
        .await
        .unwrap();

    // After the exchange the grant carries access and refresh tokens with
    // exactly the persisted values.
    let auth = h
        .reconstructor
        .find_by_token(&access, TokenType::Access)
        .await
        .unwrap()
        .unwrap();
    match &auth.tokens {
        GrantTokens::Exchanged {
            access: at,
            refresh: rt,
        } => {
            assert_eq!(at.value, access);
            assert_eq!(rt.as_ref().unwrap().value, refresh);
        }
        other => panic!("expected exchanged stage, got {other:?}"),
    }
    assert_eq!(auth.subject_id, "alice");
    assert_eq!(auth.session_id, session_id);

    // A second exchange with the same code is a replay.
    let replay = h
        .reconstructor
        .save(exchange_draft(&code, &generate_opaque_value(), None))
        .await;
    assert!(matches!(replay, Err(AuthError::ConsumedCodeReplay)));
}

#[tokio::test]
async fn concurrent_exchanges_have_one_winner() {
    let h = harness();
    h.correlation.set_pending_session(Uuid::new_v4());

    let code = generate_opaque_value();
    h.reconstructor
        .save(authorization_draft(&code))
        .await
        .unwrap();

    let reconstructor = Arc::new(h.reconstructor);
    let mut handles = Vec::new();
    for i in 0..8 {
        let reconstructor = Arc::clone(&reconstructor);
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            reconstructor
                .save(exchange_draft(&code, &format!("access-{i}"), None))
                .await
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
    assert_eq!(replays, 7);
}

#[tokio::test]
async fn remove_leaves_no_stale_active_window() {
    let h = harness();
    h.correlation.set_pending_session(Uuid::new_v4());

    let code = generate_opaque_value();
    let session_id = h
        .reconstructor
        .save(authorization_draft(&code))
        .await
        .unwrap();
    let access = generate_opaque_value();
    h.reconstructor
        .save(exchange_draft(&code, &access, None))
        .await
        .unwrap();

    // Warm the read-through cache, then deactivate.
    assert!(h.reconstructor.find_by_id(session_id).await.unwrap().is_some());
    h.reconstructor.remove(session_id).await.unwrap();

    assert!(h.reconstructor.find_by_id(session_id).await.unwrap().is_none());
    assert!(
        h.reconstructor
            .find_by_token(&access, TokenType::Access)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn issued_tokens_sign_and_verify_bodies() {
    let h = harness();
    h.correlation.set_pending_session(Uuid::new_v4());

    let code = generate_opaque_value();
    h.reconstructor
        .save(authorization_draft(&code))
        .await
        .unwrap();
    let access = generate_opaque_value();
    h.reconstructor
        .save(exchange_draft(&code, &access, None))
        .await
        .unwrap();

    let envelope = IntegrityEnvelope::new(
        Arc::clone(&h.store) as Arc<dyn tessera_auth::TokenStore>,
        &h.config.integrity,
    )
    .unwrap();

    let body = br#"{"active":true}"#;
    let signature = envelope.sign_body(Some(&access), body).await.unwrap();
    assert!(
        envelope
            .verify_signature(Some(&access), body, &signature)
            .await
            .unwrap()
    );

    // One flipped byte breaks the signature.
    let mut tampered = body.to_vec();
    tampered[0] ^= 0x01;
    assert!(
        !envelope
            .verify_signature(Some(&access), &tampered, &signature)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn fingerprint_bound_at_issuance_rejects_other_clients() {
    let h = harness();

    let validator = ClientFingerprintValidator::new(FingerprintConfig::default());
    let issued = ClientFingerprint {
        zone_offset: None,
        accept_language: Some("en-US".into()),
        user_agent: Some("Mozilla/5.0".into()),
        referer_domain: Some("app.example.com".into()),
    };
    let bound = validator.derive(issued.clone());

    let draft = GrantDraft {
        client_id: "web".into(),
        grant_type: GrantType::ClientCredentials,
        principal: "web".into(),
        scopes: ["api".to_string()].into_iter().collect(),
        code: None,
        access_token: Some(generate_opaque_value()),
        refresh_token: None,
        client_fingerprint: Some(bound),
    };
    let session_id = h.reconstructor.save(draft).await.unwrap();

    let session = h.store.session_by_id(session_id).await.unwrap().unwrap();
    let bound = session.client_fingerprint.as_deref();

    assert!(validator.verify(bound, issued.clone()).is_ok());

    let mut other = issued;
    other.user_agent = Some("curl/8.0".into());
    assert!(matches!(
        validator.verify(bound, other),
        Err(AuthError::FingerprintMismatch)
    ));
}

#[tokio::test]
async fn default_integrity_key_signs_unauthenticated_requests() {
    let h = harness();
    let integrity = IntegrityConfig {
        signature_required: true,
        key_encryption_key: h.config.integrity.key_encryption_key.clone(),
        default_signing_key: Some(STANDARD.encode([9u8; 32])),
    };
    let envelope = IntegrityEnvelope::new(
        Arc::clone(&h.store) as Arc<dyn tessera_auth::TokenStore>,
        &integrity,
    )
    .unwrap();

    let signature = envelope.sign_body(None, b"grant_type=client_credentials").await.unwrap();
    assert!(
        envelope
            .verify_signature(None, b"grant_type=client_credentials", &signature)
            .await
            .unwrap()
    );
}
