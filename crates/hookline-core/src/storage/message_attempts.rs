//! Repository for delivery attempt rows.
//!
//! Attempts are write-once audit records; there is no update path.

use std::{collections::HashMap, sync::Arc};

use sqlx::{postgres::PgRow, types::Json, Executor, PgPool, Postgres, Row, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{AttemptId, EndpointId, MessageAttempt, MessageId},
};

/// Repository for delivery attempt database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Records a delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or the message does not exist.
    pub async fn create(&self, attempt: &MessageAttempt) -> Result<AttemptId> {
        self.create_impl(&*self.pool, attempt).await
    }

    /// Records a delivery attempt within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or the message does not exist.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        attempt: &MessageAttempt,
    ) -> Result<AttemptId> {
        self.create_impl(&mut **tx, attempt).await
    }

    async fn create_impl<'e, E>(&self, executor: E, attempt: &MessageAttempt) -> Result<AttemptId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO message_attempts (
                id, message_id, endpoint_id, api_version, url, method, ip_address,
                request_headers, response_headers, content_type, http_response_code,
                response_data, error, status, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16
            )
            RETURNING id
            "#,
        )
        .bind(attempt.id.0)
        .bind(attempt.message_id.0)
        .bind(attempt.endpoint_id.0)
        .bind(&attempt.api_version)
        .bind(&attempt.url)
        .bind(&attempt.method)
        .bind(&attempt.ip_address)
        .bind(Json(&attempt.request_headers))
        .bind(Json(&attempt.response_headers))
        .bind(&attempt.content_type)
        .bind(&attempt.http_response_code)
        .bind(&attempt.response_data)
        .bind(&attempt.error)
        .bind(attempt.status.to_string())
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .fetch_one(executor)
        .await?;

        Ok(AttemptId(id))
    }

    /// Lists every attempt recorded for a message, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a row cannot be decoded.
    pub async fn find_by_message(&self, message_id: MessageId) -> Result<Vec<MessageAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, endpoint_id, api_version, url, method, ip_address,
                   request_headers, response_headers, content_type, http_response_code,
                   response_data, error, status, created_at, updated_at
            FROM message_attempts
            WHERE message_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(message_id.0)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(attempt_from_row).collect()
    }
}

fn attempt_from_row(row: &PgRow) -> Result<MessageAttempt> {
    let Json(request_headers): Json<HashMap<String, String>> = row.try_get("request_headers")?;
    let Json(response_headers): Json<HashMap<String, String>> = row.try_get("response_headers")?;
    let status: String = row.try_get("status")?;

    Ok(MessageAttempt {
        id: AttemptId(row.try_get("id")?),
        message_id: MessageId(row.try_get("message_id")?),
        endpoint_id: EndpointId(row.try_get("endpoint_id")?),
        api_version: row.try_get("api_version")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        ip_address: row.try_get("ip_address")?,
        request_headers,
        response_headers,
        content_type: row.try_get("content_type")?,
        http_response_code: row.try_get("http_response_code")?,
        response_data: row.try_get("response_data")?,
        error: row.try_get("error")?,
        status: status
            .parse()
            .map_err(|err| CoreError::Database(format!("invalid attempt row: {err}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
