//! Dispatch worker draining the message queue into the worker pool.
//!
//! The intake loop never waits for a delivery to finish. It takes the
//! message's exclusion lease, hands the message to the pool and goes back to
//! the queue. Backpressure comes only from the pool's bounded task queue.

use std::{sync::Arc, time::Duration};

use hookline_core::models::QueuedMessage;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument::WithSubscriber, warn};

use crate::{
    engine::DeliveryEngine,
    error::{DeliveryError, Result},
    lease::InFlightRegistry,
    worker_pool::{DeliveryTask, PoolConfig, PoolSender, WorkerPool},
};

/// Consumes queued messages and dispatches them for delivery.
pub struct DispatchWorker {
    input: Option<mpsc::Receiver<QueuedMessage>>,
    engine: Arc<DeliveryEngine>,
    pool_config: PoolConfig,
    pool: Option<WorkerPool>,
    registry: InFlightRegistry,
    cancellation_token: CancellationToken,
    intake: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Creates a worker that will read from `input` once started.
    pub fn new(
        input: mpsc::Receiver<QueuedMessage>,
        engine: Arc<DeliveryEngine>,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            input: Some(input),
            engine,
            pool_config,
            pool: None,
            registry: InFlightRegistry::new(),
            cancellation_token: CancellationToken::new(),
            intake: None,
        }
    }

    /// Shares an in-flight registry with other workers in this process.
    #[must_use]
    pub fn with_registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the in-flight registry.
    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Spawns the worker pool and the intake loop.
    ///
    /// Both inherit the tracing subscriber current at the call site, so a
    /// scoped test subscriber captures their logs.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AlreadyStarted` if called more than once, or
    /// a configuration error if the pool cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        let Some(input) = self.input.take() else {
            return Err(DeliveryError::AlreadyStarted);
        };

        let pool = WorkerPool::spawn(self.engine.clone(), self.pool_config)?;
        let intake = IntakeLoop {
            input,
            pool: pool.sender()?,
            registry: self.registry.clone(),
            cancellation_token: self.cancellation_token.clone(),
        };

        self.intake = Some(tokio::spawn(intake.run().with_current_subscriber()));
        self.pool = Some(pool);

        info!(worker_count = self.pool_config.worker_count, "dispatch worker started");
        Ok(())
    }

    /// Returns true while the intake loop is running.
    pub fn is_running(&self) -> bool {
        self.intake.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Number of pool workers still running.
    pub fn active_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::active_workers)
    }

    /// Stops the intake loop and closes the input channel.
    ///
    /// Returns once the loop has exited. Deliveries already handed to the
    /// pool keep running; use [`shutdown`](Self::shutdown) to wait for them.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::IntakeFailed` if the intake loop panicked.
    pub async fn close(&mut self) -> Result<()> {
        self.cancellation_token.cancel();

        if let Some(mut input) = self.input.take() {
            input.close();
        }

        if let Some(handle) = self.intake.take() {
            handle.await.map_err(|e| DeliveryError::IntakeFailed { error: e.to_string() })?;
            info!("dispatch worker closed");
        }

        Ok(())
    }

    /// Closes intake, then waits up to `timeout` for in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if deliveries are still
    /// running when `timeout` elapses, or any error from
    /// [`close`](Self::close).
    pub async fn shutdown(mut self, timeout: Duration) -> Result<()> {
        self.close().await?;

        match self.pool.take() {
            Some(pool) => pool.shutdown_graceful(timeout).await,
            None => Ok(()),
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("dispatch worker dropped while running, cancelling intake");
        }
        self.cancellation_token.cancel();
    }
}

struct IntakeLoop {
    input: mpsc::Receiver<QueuedMessage>,
    pool: PoolSender,
    registry: InFlightRegistry,
    cancellation_token: CancellationToken,
}

impl IntakeLoop {
    async fn run(mut self) {
        debug!("intake loop starting");

        loop {
            let queued = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => break,
                queued = self.input.recv() => queued,
            };

            let Some(QueuedMessage { message }) = queued else {
                info!("message queue closed, intake loop exiting");
                break;
            };

            let Some(lease) = self.registry.try_acquire(message.id) else {
                warn!(message_id = %message.id, "message already in flight, dropping duplicate");
                continue;
            };

            debug!(message_id = %message.id, "dispatching message");
            let task = DeliveryTask::new(message, lease);

            let submitted = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => break,
                submitted = self.pool.submit(task) => submitted,
            };

            if let Err(e) = submitted {
                error!(error = %e, "worker pool rejected message, intake loop exiting");
                break;
            }
        }

        self.input.close();
        debug!("intake loop stopped");
    }
}
