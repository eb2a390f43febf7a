//! Guard middleware functions.
//!
//! Each guard is an `axum::middleware::from_fn_with_state` function over a
//! shared [`GuardState`]. The inbound guards buffer the body once, check it,
//! and put it back; [`sign_response`] buffers the response of the
//! introspection/userinfo endpoints to attach the body signature.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};

use crate::config::AuthConfig;
use crate::directory::{ApplicationDirectory, ResolvedTokenSettings};
use crate::envelope::{BODY_SIGNATURE_HEADER, IntegrityEnvelope};
use crate::error::AuthError;
use crate::fingerprint::{
    ClientFingerprint, ClientFingerprintValidator, parse_referer_host, parse_zone_offset,
};
use crate::freshness::{REQUEST_DATETIME_HEADER, RequestFreshnessValidator};
use crate::storage::GrantStore;
use crate::token::TokenType;

use super::{is_guarded_path, is_signed_response_path};

/// Upper bound on a buffered request or response body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the guard middleware.
#[derive(Clone)]
pub struct GuardState {
    /// Body signing and verification.
    pub envelope: Arc<IntegrityEnvelope>,
    /// Request-datetime validation.
    pub freshness: Arc<RequestFreshnessValidator>,
    /// Fingerprint derivation and comparison.
    pub fingerprint: ClientFingerprintValidator,
    /// Grant state, for resolving bearer tokens to sessions.
    pub store: Arc<dyn GrantStore>,
    /// Application directory, for per-application tolerances.
    pub directory: Arc<dyn ApplicationDirectory>,
    /// Engine configuration.
    pub config: AuthConfig,
}

/// Verifies the `x-body-signature` header against the request body.
pub async fn verify_body_signature(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !is_guarded_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AuthError::verification_failed("request body unreadable"))?;

    let signature = header_str(&parts.headers, BODY_SIGNATURE_HEADER);
    match signature {
        None if state.config.integrity.signature_required => {
            return Err(AuthError::verification_failed("signature header missing"));
        }
        None => {}
        Some(signature) => {
            let bearer = bearer_token(&parts.headers);
            if !state
                .envelope
                .verify_signature(bearer, &bytes, signature)
                .await?
            {
                return Err(AuthError::verification_failed("body signature mismatch"));
            }
        }
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

/// Rejects guarded requests whose declared datetime is missing or outside
/// the application's transit-time window.
pub async fn enforce_request_freshness(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !is_guarded_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let declared = header_str(request.headers(), REQUEST_DATETIME_HEADER);
    let settings = resolve_settings(&state, bearer_token(request.headers())).await?;
    state.freshness.validate(declared, &settings)?;

    Ok(next.run(request).await)
}

/// Compares the request's fingerprint against the one bound to the bearer
/// token's session at issuance.
pub async fn enforce_client_fingerprint(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path = request.uri().path();
    if !is_guarded_path(path)
        || ClientFingerprintValidator::is_exempt_path(path)
        || !state.fingerprint.is_enabled()
    {
        return Ok(next.run(request).await);
    }

    let Some(bearer) = bearer_token(request.headers()) else {
        return Ok(next.run(request).await);
    };
    let Some(token) = state.store.token_by_value(bearer, TokenType::Access).await? else {
        return Ok(next.run(request).await);
    };
    let Some(session) = state.store.session_by_id(token.session_id).await? else {
        return Ok(next.run(request).await);
    };

    let presented = request_fingerprint(request.headers());
    state
        .fingerprint
        .verify(session.client_fingerprint.as_deref(), presented)?;

    Ok(next.run(request).await)
}

/// Signs the response bodies of the introspection and userinfo endpoints.
pub async fn sign_response(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !is_signed_response_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let bearer = bearer_token(request.headers()).map(ToOwned::to_owned);
    let response = next.run(request).await;
    if !response.status().is_success() {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AuthError::internal("response body unreadable"))?;

    let signature = state.envelope.sign_body(bearer.as_deref(), &bytes).await?;
    let value = HeaderValue::from_str(&signature)
        .map_err(|_| AuthError::signature_failed("signature is not a valid header value"))?;
    parts.headers.insert(BODY_SIGNATURE_HEADER, value);

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

/// Extracts the bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Derives the request's fingerprint attributes from its headers.
fn request_fingerprint(headers: &HeaderMap) -> ClientFingerprint {
    ClientFingerprint {
        zone_offset: header_str(headers, REQUEST_DATETIME_HEADER).and_then(parse_zone_offset),
        accept_language: header_str(headers, header::ACCEPT_LANGUAGE.as_str())
            .map(ToOwned::to_owned),
        user_agent: header_str(headers, header::USER_AGENT.as_str()).map(ToOwned::to_owned),
        referer_domain: header_str(headers, header::REFERER.as_str())
            .and_then(parse_referer_host),
    }
}

/// Resolves the token settings governing a request: the bearer token's
/// application settings when a known bearer is presented, engine defaults
/// otherwise.
async fn resolve_settings(
    state: &GuardState,
    bearer: Option<&str>,
) -> Result<ResolvedTokenSettings, AuthError> {
    if let Some(bearer) = bearer
        && let Some(token) = state.store.token_by_value(bearer, TokenType::Access).await?
        && let Some(app) = state.directory.by_id(token.application_id).await?
        && let Some(settings) = state.directory.token_settings(app.org_id, app.id).await?
    {
        return Ok(settings.resolve(&state.config.tokens));
    }
    Ok(crate::directory::TokenSettings::default().resolve(&state.config.tokens))
}
