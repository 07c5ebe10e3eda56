//! Polls the repository for due messages and publishes them to the queue.
//!
//! Claiming pushes a message's `next_send_time` forward by the visibility
//! timeout, so other schedulers skip it until the delivery pass stores a new
//! schedule. A pass that never persists (crash, lost queue entry) makes the
//! message due again once the timeout lapses.

use std::{sync::Arc, time::Duration};

use hookline_core::{Clock, RealClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::{DeliveryError, Result},
    queue::QueuePublisher,
    storage::MessageRepository,
};

/// Configuration for the due-message scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum messages claimed per tick.
    pub batch_size: usize,
    /// Wait between ticks that found nothing due.
    pub poll_interval: Duration,
    /// How long a claimed message stays hidden from other claimers.
    pub visibility_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(60),
        }
    }
}

/// Claims due messages and feeds them to the dispatch worker.
pub struct Scheduler {
    repository: Arc<dyn MessageRepository>,
    publisher: QueuePublisher,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler using the system clock.
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        publisher: QueuePublisher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock: Arc::new(RealClock::new()),
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Replaces the clock used to decide what is due.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a token that stops [`run`](Self::run) when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Claims one batch of due messages and publishes them.
    ///
    /// Returns the number of messages published.
    ///
    /// # Errors
    ///
    /// Returns a database error if claiming fails, or
    /// `DeliveryError::QueueClosed` if the dispatch side has gone away.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let claimed = self
            .repository
            .claim_due_messages(self.config.batch_size, now, self.config.visibility_timeout)
            .await?;

        let count = claimed.len();
        if count > 0 {
            debug!(count, "claimed due messages");
        }

        for message in claimed {
            self.publisher.publish(message).await?;
        }

        Ok(count)
    }

    /// Runs [`tick`](Self::tick) until cancelled or the queue closes.
    ///
    /// Sleeps `poll_interval` after an empty tick and five seconds after a
    /// failed one.
    ///
    /// # Errors
    ///
    /// Currently never returns an error; failed ticks are logged and retried.
    pub async fn run(&self) -> Result<()> {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "scheduler starting"
        );

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.tick().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(DeliveryError::QueueClosed) => {
                    info!("message queue closed, scheduler stopping");
                    break;
                },
                Err(error) => {
                    error!(error = %error, "scheduler tick failed");
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("scheduler stopped");
        Ok(())
    }
}
