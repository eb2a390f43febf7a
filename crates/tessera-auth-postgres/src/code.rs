//! Auth-code rows.
//!
//! The consumption check is a single `UPDATE ... WHERE consumed_on IS NULL`:
//! under concurrent exchanges the database hands exactly one caller a row.

use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use tessera_auth::AuthCode;

use crate::{StorageError, StorageResult};

pub(crate) async fn insert<'e, E>(executor: E, code: &AuthCode) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    query(
        r#"
        INSERT INTO auth_code (data, session_id, application_id, issued_on, consumed_on)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&code.data)
    .bind(code.session_id)
    .bind(code.application_id)
    .bind(code.issued_on)
    .bind(code.consumed_on)
    .execute(executor)
    .await
    .map_err(|e| {
        if let sqlx_core::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return StorageError::conflict("auth code already exists");
        }
        StorageError::from(e)
    })?;
    Ok(())
}

pub(crate) async fn session_for_code<'e, E>(executor: E, data: &str) -> StorageResult<Option<Uuid>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(Uuid,)> = query_as(
        r#"
        SELECT session_id
        FROM auth_code
        WHERE data = $1
        "#,
    )
    .bind(data)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(session_id,)| session_id))
}

/// The compare-and-set. Returns `None` when no unconsumed row matched,
/// leaving it to the caller to distinguish a replay from an unknown code.
pub(crate) async fn try_consume<'e, E>(
    executor: E,
    data: &str,
) -> StorageResult<Option<OffsetDateTime>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(OffsetDateTime,)> = query_as(
        r#"
        UPDATE auth_code
        SET consumed_on = NOW()
        WHERE data = $1
          AND consumed_on IS NULL
        RETURNING consumed_on
        "#,
    )
    .bind(data)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(consumed_on,)| consumed_on))
}

pub(crate) async fn exists<'e, E>(executor: E, data: &str) -> StorageResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(bool,)> = query_as(
        r#"
        SELECT TRUE
        FROM auth_code
        WHERE data = $1
        "#,
    )
    .bind(data)
    .fetch_optional(executor)
    .await?;

    Ok(row.is_some())
}
