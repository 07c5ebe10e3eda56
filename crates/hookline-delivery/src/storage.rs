//! Storage abstraction layer for the delivery engine.
//!
//! The engine and scheduler only see [`MessageRepository`]. Production uses
//! [`PostgresMessageRepository`] over `hookline_core::storage::Storage`;
//! tests use [`mock::MockMessageRepository`].

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookline_core::{
    error::{CoreError, Result},
    models::{Message, MessageAttempt, MessageId},
    storage::Storage,
};

/// Boxed future returned by repository operations.
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence operations required by delivery.
pub trait MessageRepository: Send + Sync + 'static {
    /// Persists the message state together with the attempts of one pass.
    ///
    /// Atomic per message: either the message and all attempts are written,
    /// or nothing is. Nothing is written unless the stored trial count still
    /// equals `expected_trial_count`; otherwise `CoreError::Conflict` is
    /// returned because another pass got there first.
    fn update_message_with_attempts<'a>(
        &'a self,
        message: &'a Message,
        expected_trial_count: u32,
        attempts: &'a [MessageAttempt],
    ) -> RepoFuture<'a, ()>;

    /// Claims up to `limit` due messages and hides them for `visibility`.
    ///
    /// Due means status pending or retry and `next_send_time` null or not
    /// after `now`. Claimed messages get `next_send_time = now + visibility`.
    fn claim_due_messages(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> RepoFuture<'_, Vec<Message>>;

    /// Finds a message by ID.
    fn find_message(&self, id: MessageId) -> RepoFuture<'_, Option<Message>>;

    /// Lists all attempts recorded for a message, oldest first.
    fn find_attempts(&self, message_id: MessageId) -> RepoFuture<'_, Vec<MessageAttempt>>;
}

fn visible_until(now: DateTime<Utc>, visibility: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(visibility)
        .ok()
        .and_then(|visibility| now.checked_add_signed(visibility))
        .ok_or_else(|| CoreError::InvalidInput(format!("visibility timeout out of range: {visibility:?}")))
}

/// PostgreSQL implementation backed by the core repositories.
pub struct PostgresMessageRepository {
    storage: Arc<Storage>,
}

impl PostgresMessageRepository {
    /// Creates a new PostgreSQL repository adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl MessageRepository for PostgresMessageRepository {
    fn update_message_with_attempts<'a>(
        &'a self,
        message: &'a Message,
        expected_trial_count: u32,
        attempts: &'a [MessageAttempt],
    ) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.storage.begin().await?;

            self.storage.messages.update_in_tx(&mut tx, message, expected_trial_count).await?;
            for attempt in attempts {
                self.storage.message_attempts.create_in_tx(&mut tx, attempt).await?;
            }

            tx.commit().await?;
            Ok(())
        })
    }

    fn claim_due_messages(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        visibility: Duration,
    ) -> RepoFuture<'_, Vec<Message>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            let until = visible_until(now, visibility)?;
            storage.messages.claim_due(limit, now, until).await
        })
    }

    fn find_message(&self, id: MessageId) -> RepoFuture<'_, Option<Message>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.messages.find_by_id(id).await })
    }

    fn find_attempts(&self, message_id: MessageId) -> RepoFuture<'_, Vec<MessageAttempt>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.message_attempts.find_by_message(message_id).await })
    }
}

pub mod mock {
    //! In-memory repository for testing delivery without a database.
    //!
    //! Unlike PostgreSQL, updating an unknown message inserts it, so engine
    //! tests can deliver messages that were never seeded. Updates of a seeded
    //! message are conditional on its trial count, as in PostgreSQL.

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use chrono::{DateTime, Utc};
    use hookline_core::{
        error::CoreError,
        models::{Message, MessageAttempt, MessageId, MessageStatus},
    };
    use tokio::sync::RwLock;

    use super::{visible_until, MessageRepository, RepoFuture};

    /// Mock repository with failure injection and inspection helpers.
    #[derive(Clone, Default)]
    pub struct MockMessageRepository {
        messages: Arc<RwLock<HashMap<MessageId, Message>>>,
        attempts: Arc<RwLock<Vec<MessageAttempt>>>,
        update_error: Arc<RwLock<Option<String>>>,
        claim_error: Arc<RwLock<Option<String>>>,
        update_count: Arc<AtomicUsize>,
    }

    impl MockMessageRepository {
        /// Creates a new mock repository with empty state.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a message.
        pub async fn insert_message(&self, message: Message) {
            self.messages.write().await.insert(message.id, message);
        }

        /// Returns the stored copy of a message.
        pub async fn stored_message(&self, id: MessageId) -> Option<Message> {
            self.messages.read().await.get(&id).cloned()
        }

        /// Returns the stored status of a message.
        pub async fn stored_status(&self, id: MessageId) -> Option<MessageStatus> {
            self.messages.read().await.get(&id).map(|message| message.status)
        }

        /// Returns every recorded attempt, in insertion order.
        pub async fn recorded_attempts(&self) -> Vec<MessageAttempt> {
            self.attempts.read().await.clone()
        }

        /// Makes the next update fail with a database error.
        pub async fn inject_update_error(&self, error: impl Into<String>) {
            *self.update_error.write().await = Some(error.into());
        }

        /// Makes the next claim fail with a database error.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Number of successful `update_message_with_attempts` calls.
        pub fn update_count(&self) -> usize {
            self.update_count.load(Ordering::Acquire)
        }
    }

    impl MessageRepository for MockMessageRepository {
        fn update_message_with_attempts<'a>(
            &'a self,
            message: &'a Message,
            expected_trial_count: u32,
            attempts: &'a [MessageAttempt],
        ) -> RepoFuture<'a, ()> {
            Box::pin(async move {
                if let Some(error) = self.update_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                // Lock order matches claim_due_messages
                let mut messages = self.messages.write().await;
                if let Some(stored) = messages.get(&message.id) {
                    if stored.metadata.trial_count != expected_trial_count {
                        return Err(CoreError::Conflict(format!(
                            "message {} no longer at trial {expected_trial_count}",
                            message.id
                        )));
                    }
                }

                let mut stored_attempts = self.attempts.write().await;
                messages.insert(message.id, message.clone());
                stored_attempts.extend_from_slice(attempts);

                self.update_count.fetch_add(1, Ordering::AcqRel);
                Ok(())
            })
        }

        fn claim_due_messages(
            &self,
            limit: usize,
            now: DateTime<Utc>,
            visibility: Duration,
        ) -> RepoFuture<'_, Vec<Message>> {
            Box::pin(async move {
                if let Some(error) = self.claim_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let until = visible_until(now, visibility)?;
                let mut messages = self.messages.write().await;

                let mut due: Vec<&mut Message> = messages
                    .values_mut()
                    .filter(|message| {
                        matches!(message.status, MessageStatus::Pending | MessageStatus::Retry)
                            && message.metadata.next_send_time.is_none_or(|next| next <= now)
                    })
                    .collect();
                due.sort_by_key(|message| message.created_at);

                Ok(due
                    .into_iter()
                    .take(limit)
                    .map(|message| {
                        message.metadata.next_send_time = Some(until);
                        message.updated_at = now;
                        message.clone()
                    })
                    .collect())
            })
        }

        fn find_message(&self, id: MessageId) -> RepoFuture<'_, Option<Message>> {
            Box::pin(async move { Ok(self.messages.read().await.get(&id).cloned()) })
        }

        fn find_attempts(&self, message_id: MessageId) -> RepoFuture<'_, Vec<MessageAttempt>> {
            Box::pin(async move {
                Ok(self
                    .attempts
                    .read()
                    .await
                    .iter()
                    .filter(|attempt| attempt.message_id == message_id)
                    .cloned()
                    .collect())
            })
        }
    }
}
