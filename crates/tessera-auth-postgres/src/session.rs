//! Session rows.

use std::collections::BTreeSet;

use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use tessera_auth::{AuthFlow, AuthSession, SessionStatus};

use crate::{StorageError, StorageResult};

type SessionTuple = (
    Uuid,
    i32,
    String,
    serde_json::Value,
    String,
    String,
    Option<Vec<u8>>,
    Option<String>,
    Option<String>,
    String,
    OffsetDateTime,
);

pub(crate) fn flow_to_str(flow: AuthFlow) -> &'static str {
    match flow {
        AuthFlow::AuthorizationCode => "authorization_code",
        AuthFlow::Pkce => "pkce",
        AuthFlow::ClientCredentials => "client_credentials",
        AuthFlow::RefreshToken => "refresh_token",
    }
}

pub(crate) fn flow_from_str(value: &str) -> StorageResult<AuthFlow> {
    match value {
        "authorization_code" => Ok(AuthFlow::AuthorizationCode),
        "pkce" => Ok(AuthFlow::Pkce),
        "client_credentials" => Ok(AuthFlow::ClientCredentials),
        "refresh_token" => Ok(AuthFlow::RefreshToken),
        other => Err(StorageError::invalid_stored_value(format!(
            "unknown auth flow: {other}"
        ))),
    }
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Inactive => "inactive",
    }
}

fn status_from_str(value: &str) -> StorageResult<SessionStatus> {
    match value {
        "active" => Ok(SessionStatus::Active),
        "inactive" => Ok(SessionStatus::Inactive),
        other => Err(StorageError::invalid_stored_value(format!(
            "unknown session status: {other}"
        ))),
    }
}

fn from_tuple(row: SessionTuple) -> StorageResult<AuthSession> {
    let scopes: BTreeSet<String> = serde_json::from_value(row.3)?;
    Ok(AuthSession {
        session_id: row.0,
        application_id: row.1,
        subject_id: row.2,
        scopes,
        auth_flow: flow_from_str(&row.4)?,
        client_id: row.5,
        client_fingerprint: row.6,
        branding: row.7,
        redirect_uri: row.8,
        status: status_from_str(&row.9)?,
        created_on: row.10,
    })
}

pub(crate) async fn insert<'e, E>(executor: E, session: &AuthSession) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let scopes = serde_json::to_value(&session.scopes)?;
    query(
        r#"
        INSERT INTO auth_session
            (session_id, application_id, subject_id, scopes, auth_flow, client_id,
             client_fingerprint, branding, redirect_uri, status, created_on)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(session.session_id)
    .bind(session.application_id)
    .bind(&session.subject_id)
    .bind(&scopes)
    .bind(flow_to_str(session.auth_flow))
    .bind(&session.client_id)
    .bind(session.client_fingerprint.as_deref())
    .bind(session.branding.as_deref())
    .bind(session.redirect_uri.as_deref())
    .bind(status_to_str(session.status))
    .bind(session.created_on)
    .execute(executor)
    .await
    .map_err(|e| {
        if let sqlx_core::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return StorageError::conflict("session already exists");
        }
        StorageError::from(e)
    })?;
    Ok(())
}

pub(crate) async fn by_id<'e, E>(executor: E, session_id: Uuid) -> StorageResult<Option<AuthSession>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<SessionTuple> = query_as(
        r#"
        SELECT session_id, application_id, subject_id, scopes, auth_flow, client_id,
               client_fingerprint, branding, redirect_uri, status, created_on
        FROM auth_session
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(executor)
    .await?;

    row.map(from_tuple).transpose()
}

/// Write-once: only rows whose `redirect_uri` is still null are updated.
pub(crate) async fn set_branding_and_redirect_uri<'e, E>(
    executor: E,
    session_id: Uuid,
    branding: Option<&str>,
    redirect_uri: &str,
) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = query(
        r#"
        UPDATE auth_session
        SET branding = $2, redirect_uri = $3
        WHERE session_id = $1
          AND redirect_uri IS NULL
        "#,
    )
    .bind(session_id)
    .bind(branding)
    .bind(redirect_uri)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found(format!("session {session_id}")));
    }
    Ok(())
}

pub(crate) async fn set_inactive<'e, E>(executor: E, session_id: Uuid) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = query(
        r#"
        UPDATE auth_session
        SET status = 'inactive'
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found(format!("session {session_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_mapping_roundtrip() {
        for flow in [
            AuthFlow::AuthorizationCode,
            AuthFlow::Pkce,
            AuthFlow::ClientCredentials,
            AuthFlow::RefreshToken,
        ] {
            assert_eq!(flow_from_str(flow_to_str(flow)).unwrap(), flow);
        }
        assert!(flow_from_str("implicit").is_err());
    }

    #[test]
    fn test_status_mapping_roundtrip() {
        for status in [SessionStatus::Active, SessionStatus::Inactive] {
            assert_eq!(status_from_str(status_to_str(status)).unwrap(), status);
        }
        assert!(status_from_str("revoked").is_err());
    }
}
