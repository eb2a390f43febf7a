//! Axum guards for the request trust boundary.
//!
//! Guarded requests pass three checks in order: body-signature
//! verification, request freshness, client fingerprint. Introspection and
//! userinfo responses are additionally signed on the way out. Every
//! rejection maps to one generic response so a probing client cannot learn
//! which check failed.

mod error;
mod guard;

pub use guard::{
    GuardState, enforce_client_fingerprint, enforce_request_freshness, sign_response,
    verify_body_signature,
};

/// Returns `true` for paths the integrity and freshness guards cover.
#[must_use]
pub fn is_guarded_path(path: &str) -> bool {
    path == "/api"
        || path.starts_with("/api/")
        || path == "/oauth2/introspect"
        || path == "/userinfo"
}

/// Returns `true` for paths whose responses are signed.
#[must_use]
pub fn is_signed_response_path(path: &str) -> bool {
    path == "/oauth2/introspect" || path == "/userinfo"
}
