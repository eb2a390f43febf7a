//! Token rows.

use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use tessera_auth::{TokenRecord, TokenType};

use crate::{StorageError, StorageResult};

type TokenTuple = (
    Uuid,
    Uuid,
    i32,
    String,
    bool,
    String,
    String,
    Option<Vec<u8>>,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

pub(crate) fn type_to_str(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::Code => "code",
        TokenType::Access => "access",
        TokenType::Refresh => "refresh",
        TokenType::Id => "id",
    }
}

fn type_from_str(value: &str) -> StorageResult<TokenType> {
    match value {
        "code" => Ok(TokenType::Code),
        "access" => Ok(TokenType::Access),
        "refresh" => Ok(TokenType::Refresh),
        "id" => Ok(TokenType::Id),
        other => Err(StorageError::invalid_stored_value(format!(
            "unknown token type: {other}"
        ))),
    }
}

fn from_tuple(row: TokenTuple) -> StorageResult<TokenRecord> {
    Ok(TokenRecord {
        id: row.0,
        session_id: row.1,
        application_id: row.2,
        token_type: type_from_str(&row.3)?,
        opaque: row.4,
        subject_id: row.5,
        data: row.6,
        signing_key: row.7,
        created_on: row.8,
        expiration: row.9,
    })
}

pub(crate) async fn insert<'e, E>(executor: E, token: &TokenRecord) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    query(
        r#"
        INSERT INTO auth_token
            (id, session_id, application_id, token_type, opaque, subject_id,
             data, signing_key, created_on, expiration)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(token.id)
    .bind(token.session_id)
    .bind(token.application_id)
    .bind(type_to_str(token.token_type))
    .bind(token.opaque)
    .bind(&token.subject_id)
    .bind(&token.data)
    .bind(token.signing_key.as_deref())
    .bind(token.created_on)
    .bind(token.expiration)
    .execute(executor)
    .await
    .map_err(|e| {
        if let sqlx_core::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return StorageError::conflict("token row already exists");
        }
        StorageError::from(e)
    })?;
    Ok(())
}

pub(crate) async fn by_value<'e, E>(
    executor: E,
    value: &str,
    token_type: TokenType,
) -> StorageResult<Option<TokenRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<TokenTuple> = query_as(
        r#"
        SELECT id, session_id, application_id, token_type, opaque, subject_id,
               data, signing_key, created_on, expiration
        FROM auth_token
        WHERE data = $1
          AND token_type = $2
        ORDER BY created_on DESC
        LIMIT 1
        "#,
    )
    .bind(value)
    .bind(type_to_str(token_type))
    .fetch_optional(executor)
    .await?;

    row.map(from_tuple).transpose()
}

pub(crate) async fn live_by_session<'e, E>(
    executor: E,
    session_id: Uuid,
    now: OffsetDateTime,
) -> StorageResult<Vec<TokenRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<TokenTuple> = query_as(
        r#"
        SELECT id, session_id, application_id, token_type, opaque, subject_id,
               data, signing_key, created_on, expiration
        FROM auth_token
        WHERE session_id = $1
          AND expiration > $2
        "#,
    )
    .bind(session_id)
    .bind(now)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(from_tuple).collect()
}

pub(crate) async fn live_by_application<'e, E>(
    executor: E,
    application_id: i32,
    at: OffsetDateTime,
) -> StorageResult<Vec<TokenRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<TokenTuple> = query_as(
        r#"
        SELECT id, session_id, application_id, token_type, opaque, subject_id,
               data, signing_key, created_on, expiration
        FROM auth_token
        WHERE application_id = $1
          AND token_type = 'access'
          AND created_on <= $2
          AND expiration > $2
        "#,
    )
    .bind(application_id)
    .bind(at)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(from_tuple).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping_roundtrip() {
        for token_type in [
            TokenType::Code,
            TokenType::Access,
            TokenType::Refresh,
            TokenType::Id,
        ] {
            assert_eq!(type_from_str(type_to_str(token_type)).unwrap(), token_type);
        }
        assert!(type_from_str("bearer").is_err());
    }
}
