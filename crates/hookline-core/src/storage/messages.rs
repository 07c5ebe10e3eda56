//! Repository for message rows.
//!
//! Messages are created upstream, claimed by the scheduler when due and
//! rewritten after every delivery pass. They are never deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use sqlx::{postgres::PgRow, types::Json, Executor, PgPool, Postgres, Row, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{EndpointMetadata, Message, MessageId, MessageMetadata},
};

const MESSAGE_COLUMNS: &str = "id, event_type, data::text AS data, endpoints, secret, \
                               trial_count, retry_limit, interval_seconds, strategy, \
                               next_send_time, status, description, created_at, updated_at";

/// Repository for message database operations.
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

    /// Inserts a new message.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` if the ID already exists.
    pub async fn create(&self, message: &Message) -> Result<MessageId> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO messages (
                id, event_type, data, endpoints, secret, trial_count, retry_limit,
                interval_seconds, strategy, next_send_time, status, description,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3::json, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            RETURNING id
            "#,
        )
        .bind(message.id.0)
        .bind(&message.event_type)
        .bind(message.data.get())
        .bind(Json(&message.endpoints))
        .bind(&message.secret)
        .bind(to_i32(message.metadata.trial_count, "trial_count")?)
        .bind(to_i32(message.metadata.retry_limit, "retry_limit")?)
        .bind(to_i64(message.metadata.interval_seconds, "interval_seconds")?)
        .bind(message.metadata.strategy.to_string())
        .bind(message.metadata.next_send_time)
        .bind(message.status.to_string())
        .bind(&message.description)
        .bind(message.created_at)
        .bind(message.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(MessageId(id))
    }

    /// Finds a message by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the stored row cannot be decoded.
    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query(&query).bind(id.0).fetch_optional(&*self.pool).await?;

        row.as_ref().map(message_from_row).transpose()
    }

    /// Claims up to `limit` messages that are due for a delivery pass.
    ///
    /// A message is due when its status is pending or retry and its
    /// `next_send_time` is null or not after `now`. Claimed rows have their
    /// `next_send_time` pushed to `visible_until` so concurrent schedulers
    /// skip them until the pass persists a new schedule. Uses
    /// `FOR UPDATE SKIP LOCKED` so claimers never block each other.
    ///
    /// # Errors
    ///
    /// Returns error if the claiming transaction fails.
    pub async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        visible_until: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let limit = i64::try_from(limit)
            .map_err(|_| CoreError::InvalidInput(format!("claim limit too large: {limit}")))?;

        let mut tx = self.pool.begin().await?;

        let query = format!(
            r#"
            WITH due AS (
                SELECT id FROM messages
                WHERE status IN ('pending', 'retry')
                  AND (next_send_time IS NULL OR next_send_time <= $1)
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE messages
            SET next_send_time = $3, updated_at = $1
            FROM due
            WHERE messages.id = due.id
            RETURNING {}
            "#,
            qualified_columns("messages")
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .bind(visible_until)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut messages = rows.iter().map(message_from_row).collect::<Result<Vec<_>>>()?;
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    /// Rewrites the mutable delivery state of a message.
    ///
    /// The write only applies while the stored trial count still equals
    /// `expected_trial_count`, the count the delivery pass started from.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the message does not exist, or
    /// `CoreError::Conflict` if another pass already advanced it.
    pub async fn update(&self, message: &Message, expected_trial_count: u32) -> Result<()> {
        self.update_impl(&*self.pool, message, expected_trial_count).await
    }

    /// Conditional rewrite of a message within a transaction.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update).
    pub async fn update_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Message,
        expected_trial_count: u32,
    ) -> Result<()> {
        self.update_impl(&mut **tx, message, expected_trial_count).await
    }

    async fn update_impl<'e, E>(
        &self,
        executor: E,
        message: &Message,
        expected_trial_count: u32,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        // The outer SELECT sees the pre-update snapshot
        let (updated, found): (bool, bool) = sqlx::query_as(
            r#"
            WITH updated AS (
                UPDATE messages
                SET endpoints = $2,
                    trial_count = $3,
                    next_send_time = $4,
                    status = $5,
                    description = $6,
                    updated_at = $7
                WHERE id = $1 AND trial_count = $8
                RETURNING id
            )
            SELECT EXISTS (SELECT 1 FROM updated),
                   EXISTS (SELECT 1 FROM messages WHERE id = $1)
            "#,
        )
        .bind(message.id.0)
        .bind(Json(&message.endpoints))
        .bind(to_i32(message.metadata.trial_count, "trial_count")?)
        .bind(message.metadata.next_send_time)
        .bind(message.status.to_string())
        .bind(&message.description)
        .bind(message.updated_at)
        .bind(to_i32(expected_trial_count, "expected trial_count")?)
        .fetch_one(executor)
        .await?;

        match (updated, found) {
            (true, _) => Ok(()),
            (false, true) => Err(CoreError::Conflict(format!(
                "message {} no longer at trial {expected_trial_count}",
                message.id
            ))),
            (false, false) => Err(CoreError::NotFound(format!("message {}", message.id))),
        }
    }
}

fn qualified_columns(table: &str) -> String {
    MESSAGE_COLUMNS
        .split(", ")
        .map(|column| match column.split_once("::") {
            Some((name, rest)) => format!("{table}.{name}::{rest}"),
            None => format!("{table}.{column}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let data: String = row.try_get("data")?;
    let Json(endpoints): Json<Vec<EndpointMetadata>> = row.try_get("endpoints")?;
    let strategy: String = row.try_get("strategy")?;
    let status: String = row.try_get("status")?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        event_type: row.try_get("event_type")?,
        data: RawValue::from_string(data)?,
        endpoints,
        secret: row.try_get("secret")?,
        metadata: MessageMetadata {
            trial_count: from_i32(row.try_get("trial_count")?, "trial_count")?,
            retry_limit: from_i32(row.try_get("retry_limit")?, "retry_limit")?,
            interval_seconds: from_i64(row.try_get("interval_seconds")?, "interval_seconds")?,
            strategy: strategy.parse().map_err(invalid_row)?,
            next_send_time: row.try_get("next_send_time")?,
        },
        status: status.parse().map_err(invalid_row)?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn invalid_row(err: impl std::fmt::Display) -> CoreError {
    CoreError::Database(format!("invalid message row: {err}"))
}

fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| CoreError::InvalidInput(format!("{field} out of range")))
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| CoreError::InvalidInput(format!("{field} out of range")))
}

fn from_i32(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| invalid_row(format!("negative {field}")))
}

fn from_i64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| invalid_row(format!("negative {field}")))
}
