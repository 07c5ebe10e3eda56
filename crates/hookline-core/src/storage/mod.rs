//! PostgreSQL persistence for messages and their delivery attempts.
//!
//! Repositories translate between domain models and rows. All SQL lives in
//! this module; the delivery crate only sees the repositories.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

pub mod message_attempts;
pub mod messages;

use crate::error::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id UUID PRIMARY KEY,
        event_type TEXT NOT NULL,
        data JSON NOT NULL,
        endpoints JSONB NOT NULL,
        secret TEXT NOT NULL,
        trial_count INTEGER NOT NULL DEFAULT 0,
        retry_limit INTEGER NOT NULL,
        interval_seconds BIGINT NOT NULL,
        strategy TEXT NOT NULL DEFAULT 'default',
        next_send_time TIMESTAMPTZ,
        status TEXT NOT NULL DEFAULT 'pending',
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_messages_due
        ON messages (next_send_time)
        WHERE status IN ('pending', 'retry')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_attempts (
        id UUID PRIMARY KEY,
        message_id UUID NOT NULL REFERENCES messages(id),
        endpoint_id UUID NOT NULL,
        api_version TEXT NOT NULL,
        url TEXT NOT NULL,
        method TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        request_headers JSONB NOT NULL,
        response_headers JSONB NOT NULL,
        content_type TEXT NOT NULL,
        http_response_code TEXT NOT NULL,
        response_data TEXT NOT NULL,
        error TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_message_attempts_message
        ON message_attempts (message_id, created_at)
    "#,
];

/// Container for all repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for message rows.
    pub messages: Arc<messages::Repository>,

    /// Repository for attempt rows.
    pub message_attempts: Arc<message_attempts::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            messages: Arc::new(messages::Repository::new(pool.clone())),
            message_attempts: Arc::new(message_attempts::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a transaction on the shared pool.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if no connection can be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Creates the tables and indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }

        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;

        Ok(())
    }
}
