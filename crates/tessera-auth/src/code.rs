//! Single-use authorization codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Durable auth-code row.
///
/// `consumed_on` transitions null→timestamp exactly once, via an atomic
/// compare-and-set in the store. Concurrent exchange attempts on the same
/// code must yield exactly one winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCode {
    /// Owning session.
    pub session_id: Uuid,

    /// Owning application (internal id).
    pub application_id: i32,

    /// The code value. Secret; never logged.
    pub data: String,

    /// Timestamp when the code was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_on: OffsetDateTime,

    /// Timestamp when the code was exchanged. Set at most once.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_on: Option<OffsetDateTime>,
}

impl AuthCode {
    /// Creates a new unconsumed code row.
    #[must_use]
    pub fn new(session_id: Uuid, application_id: i32, data: impl Into<String>) -> Self {
        Self {
            session_id,
            application_id,
            data: data.into(),
            issued_on: OffsetDateTime::now_utc(),
            consumed_on: None,
        }
    }

    /// Returns `true` if the code has been exchanged.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_on.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_code_is_unconsumed() {
        let code = AuthCode::new(Uuid::new_v4(), 1, "abc");
        assert!(!code.is_consumed());
    }
}
