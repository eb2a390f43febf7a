//! Authorization session records.
//!
//! An [`AuthSession`] is the durable spine of one grant: every token, auth
//! code, and PKCE record hangs off a session id. Sessions are created either
//! at authorization-code issuance (interactive flows) or directly at token
//! issuance (client-credentials / refresh flows).
//!
//! # Lifecycle
//!
//! A session is mutated exactly twice, at most:
//!
//! 1. `branding` and `redirect_uri` are written once, during the code→token
//!    exchange transition.
//! 2. The status flips to [`SessionStatus::Inactive`] on revocation.
//!    Inactive is terminal — a session is never reactivated, and never
//!    deleted (audit trail).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Session status. `Inactive` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is live; its tokens may reconstruct a grant.
    Active,
    /// Session has been deactivated. Never reactivated, never deleted.
    Inactive,
}

/// The flow that produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    /// Interactive authorization-code flow (confidential client).
    AuthorizationCode,
    /// Interactive authorization-code flow with PKCE (public client).
    Pkce,
    /// Machine-to-machine client-credentials flow.
    ClientCredentials,
    /// Token refresh.
    RefreshToken,
}

impl AuthFlow {
    /// Returns `true` for the interactive flows that carry an auth code.
    #[must_use]
    pub fn is_interactive(self) -> bool {
        matches!(self, Self::AuthorizationCode | Self::Pkce)
    }
}

/// Durable authorization session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    /// Unique session identifier. Every other grant row references this.
    pub session_id: Uuid,

    /// Internal id of the owning application.
    pub application_id: i32,

    /// The authenticated principal (username, or the client id itself for
    /// client-credentials grants).
    pub subject_id: String,

    /// Granted scopes.
    pub scopes: BTreeSet<String>,

    /// The flow that created this session.
    pub auth_flow: AuthFlow,

    /// OAuth client identifier.
    pub client_id: String,

    /// Fingerprint of the client context that authenticated, bound at
    /// issuance. Absent for flows where fingerprinting does not apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_fingerprint: Option<Vec<u8>>,

    /// Opaque branding label captured at the exchange transition.
    /// Write-once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branding: Option<String>,

    /// Redirect URI captured at the exchange transition. Write-once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Current status.
    pub status: SessionStatus,

    /// Timestamp when the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
}

impl AuthSession {
    /// Creates a new active session.
    #[must_use]
    pub fn new(
        application_id: i32,
        subject_id: impl Into<String>,
        scopes: BTreeSet<String>,
        auth_flow: AuthFlow,
        client_id: impl Into<String>,
        client_fingerprint: Option<Vec<u8>>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            application_id,
            subject_id: subject_id.into(),
            scopes,
            auth_flow,
            client_id: client_id.into(),
            client_fingerprint,
            branding: None,
            redirect_uri: None,
            status: SessionStatus::Active,
            created_on: OffsetDateTime::now_utc(),
        }
    }

    /// Returns `true` if the session is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
