//! Token records.
//!
//! One row per issued credential. Rows are append-only: re-issuance writes a
//! new row, and reconstruction considers only the latest non-expired row per
//! (session, type). Historical rows remain for audit.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The kind of credential a [`TokenRecord`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Single-use authorization code.
    Code,
    /// Access token.
    Access,
    /// Refresh token.
    Refresh,
    /// OpenID Connect ID token.
    Id,
}

/// Durable token row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Row identifier.
    pub id: Uuid,

    /// Owning session.
    pub session_id: Uuid,

    /// Owning application (internal id).
    pub application_id: i32,

    /// Credential kind.
    pub token_type: TokenType,

    /// Whether the value is opaque (true for codes) or self-describing.
    pub opaque: bool,

    /// Principal the credential was issued to.
    pub subject_id: String,

    /// The credential value. Treated as a secret: never logged.
    pub data: String,

    /// Per-authorization signing key, wrapped at rest. Present on access
    /// and refresh rows; the raw key never reaches storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<Vec<u8>>,

    /// Timestamp when the row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,

    /// Expiration. A row with no expiration is treated as expired.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expiration: Option<OffsetDateTime>,
}

impl TokenRecord {
    /// Returns `true` if the row has a future expiration.
    #[must_use]
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expiration.is_some_and(|exp| exp > now)
    }
}
