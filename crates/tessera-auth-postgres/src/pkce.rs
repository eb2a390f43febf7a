//! PKCE rows.

use std::str::FromStr;

use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use tessera_auth::{CodeChallengeMethod, PkceRecord};

use crate::{StorageError, StorageResult};

type PkceTuple = (Uuid, i32, String, String, String, OffsetDateTime);

fn from_tuple(row: PkceTuple) -> StorageResult<PkceRecord> {
    let algorithm = CodeChallengeMethod::from_str(&row.3).map_err(|_| {
        StorageError::invalid_stored_value(format!("unknown challenge method: {}", row.3))
    })?;
    Ok(PkceRecord {
        session_id: row.0,
        application_id: row.1,
        data: row.2,
        algorithm,
        redirect_uri: row.4,
        created_on: row.5,
    })
}

pub(crate) async fn insert<'e, E>(executor: E, record: &PkceRecord) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    query(
        r#"
        INSERT INTO auth_pkce (session_id, application_id, data, algorithm, redirect_uri, created_on)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record.session_id)
    .bind(record.application_id)
    .bind(&record.data)
    .bind(record.algorithm.to_string())
    .bind(&record.redirect_uri)
    .bind(record.created_on)
    .execute(executor)
    .await
    .map_err(|e| {
        if let sqlx_core::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return StorageError::conflict("pkce record already exists");
        }
        StorageError::from(e)
    })?;
    Ok(())
}

pub(crate) async fn by_session<'e, E>(
    executor: E,
    session_id: Uuid,
) -> StorageResult<Option<PkceRecord>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<PkceTuple> = query_as(
        r#"
        SELECT session_id, application_id, data, algorithm, redirect_uri, created_on
        FROM auth_pkce
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(executor)
    .await?;

    row.map(from_tuple).transpose()
}
