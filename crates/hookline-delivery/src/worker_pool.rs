//! Fixed-size pool of delivery tasks fed by a bounded queue.
//!
//! Bounds both delivery concurrency (`worker_count`) and intake backpressure
//! (`queue_capacity`). Workers share one receiver and run one pass at a time.

use std::{sync::Arc, time::Duration};

use hookline_core::models::Message;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument::WithSubscriber, warn};

use crate::{
    engine::{DeliveryEngine, PassOutcome},
    error::{DeliveryError, Result},
    lease::MessageLease,
};

/// Sizing for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of concurrent delivery tasks.
    pub worker_count: usize,
    /// Tasks that may wait for a free worker before `submit` blocks.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// One message waiting for a delivery pass.
#[derive(Debug)]
pub struct DeliveryTask {
    /// Message to deliver.
    pub message: Message,
    /// Exclusion lease, released once the pass finishes.
    pub lease: Option<MessageLease>,
}

impl DeliveryTask {
    /// Creates a task holding `lease` for the duration of the pass.
    pub fn new(message: Message, lease: MessageLease) -> Self {
        Self { message, lease: Some(lease) }
    }

    /// Creates a task without an exclusion lease.
    pub fn unleased(message: Message) -> Self {
        Self { message, lease: None }
    }
}

/// Cloneable submission handle for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolSender {
    sender: mpsc::Sender<DeliveryTask>,
}

impl PoolSender {
    /// Queues a task, waiting while the pool queue is full.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PoolClosed` once the pool has shut down.
    pub async fn submit(&self, task: DeliveryTask) -> Result<()> {
        self.sender.send(task).await.map_err(|_| DeliveryError::PoolClosed)
    }
}

/// Worker pool running delivery passes.
pub struct WorkerPool {
    sender: Option<PoolSender>,
    handles: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `config.worker_count` workers sharing `engine`.
    ///
    /// Workers inherit the tracing subscriber current at the call site.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if `worker_count` or
    /// `queue_capacity` is zero.
    pub fn spawn(engine: Arc<DeliveryEngine>, config: PoolConfig) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if config.queue_capacity == 0 {
            return Err(DeliveryError::configuration("queue_capacity must be at least 1"));
        }

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            "spawning delivery workers"
        );

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancellation_token = CancellationToken::new();

        let handles = (0..config.worker_count)
            .map(|worker_id| {
                let worker = PoolWorker {
                    id: worker_id,
                    engine: engine.clone(),
                    receiver: receiver.clone(),
                    cancellation_token: cancellation_token.clone(),
                };
                tokio::spawn(worker.run().with_current_subscriber())
            })
            .collect();

        Ok(Self { sender: Some(PoolSender { sender }), handles, cancellation_token })
    }

    /// Returns a cloneable submission handle.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PoolClosed` if the pool is shutting down.
    pub fn sender(&self) -> Result<PoolSender> {
        self.sender.clone().ok_or(DeliveryError::PoolClosed)
    }

    /// Queues a task, waiting while the pool queue is full.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PoolClosed` once the pool has shut down.
    pub async fn submit(&self, task: DeliveryTask) -> Result<()> {
        match &self.sender {
            Some(sender) => sender.submit(task).await,
            None => Err(DeliveryError::PoolClosed),
        }
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Stops intake, lets workers drain queued tasks and joins them.
    ///
    /// Outstanding [`PoolSender`] clones keep the queue open; drop them
    /// first. If `timeout` elapses, workers are cancelled after their current
    /// pass and `ShutdownTimeout` is returned.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::WorkerPanic` for the first worker that
    /// panicked, or `DeliveryError::ShutdownTimeout` if draining takes longer
    /// than `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.handles.len(),
            timeout_ms = timeout.as_millis(),
            "initiating graceful worker shutdown"
        );

        self.sender.take();
        let handles = std::mem::take(&mut self.handles);

        let join_all = async {
            let mut first_panic = None;

            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }

            first_panic
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_ms = timeout.as_millis(),
                    "worker shutdown timed out, cancelling remaining workers"
                );
                self.cancellation_token.cancel();
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.active_workers();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active,
                "worker pool dropped without shutdown_graceful, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}

struct PoolWorker {
    id: usize,
    engine: Arc<DeliveryEngine>,
    receiver: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    cancellation_token: CancellationToken,
}

impl PoolWorker {
    async fn run(self) {
        debug!(worker_id = self.id, "delivery worker starting");

        loop {
            let task = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    () = self.cancellation_token.cancelled() => None,
                    task = receiver.recv() => task,
                }
            };

            let Some(task) = task else { break };
            self.process(task).await;
        }

        debug!(worker_id = self.id, "delivery worker stopped");
    }

    async fn process(&self, task: DeliveryTask) {
        let DeliveryTask { mut message, lease } = task;

        match self.engine.deliver(&mut message).await {
            Ok(PassOutcome::Completed(report)) => debug!(
                worker_id = self.id,
                message_id = %message.id,
                status = %report.status,
                attempts = report.attempts.len(),
                persisted = report.persisted,
                "delivery pass finished"
            ),
            Ok(PassOutcome::AlreadyTerminal { status }) => debug!(
                worker_id = self.id,
                message_id = %message.id,
                status = %status,
                "skipped terminal message"
            ),
            Ok(PassOutcome::Superseded { stored_trial_count, .. }) => debug!(
                worker_id = self.id,
                message_id = %message.id,
                stored_trial_count,
                "skipped stale message copy"
            ),
            Err(error) => error!(
                worker_id = self.id,
                message_id = %message.id,
                error = %error,
                "delivery pass aborted"
            ),
        }

        drop(lease);
    }
}
