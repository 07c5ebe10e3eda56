//! Webhook fan-out with signed requests, bounded retries and audit records.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──▶ queue ──▶ DispatchWorker ──▶ WorkerPool ──▶ DeliveryEngine
//!     ▲                      (lease)                             │
//!     │                                                          ▼
//!     └────────────── MessageRepository ◀──── attempts ◀── DeliveryClient
//! ```
//!
//! 1. **Scheduler** claims due messages and publishes them to the queue
//! 2. **DispatchWorker** takes a per-message lease and submits to the pool
//! 3. **DeliveryEngine** runs one pass: sign once, POST to every unsent
//!    endpoint, record an attempt per call, decide retry or terminal state
//! 4. **MessageRepository** stores the message and the pass's attempts
//!    atomically
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookline_delivery::{
//!     client::DeliveryClient, queue, storage::mock::MockMessageRepository, DeliveryEngine,
//!     DispatchWorker, EngineConfig, PoolConfig,
//! };
//!
//! # async fn example() -> hookline_delivery::Result<()> {
//! let engine = DeliveryEngine::new(
//!     DeliveryClient::with_defaults()?,
//!     Arc::new(MockMessageRepository::new()),
//!     EngineConfig::default(),
//! );
//! let (publisher, receiver) = queue::channel(128);
//!
//! let mut worker = DispatchWorker::new(receiver, Arc::new(engine), PoolConfig::default());
//! worker.start()?;
//! # drop(publisher);
//! worker.shutdown(std::time::Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod client;
pub mod engine;
pub mod error;
pub mod lease;
mod peer;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod storage;
pub mod worker;
pub mod worker_pool;

pub use engine::{DeliveryEngine, EngineConfig, PassOutcome, PassReport};
pub use error::{DeliveryError, Result};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::DispatchWorker;
pub use worker_pool::{PoolConfig, WorkerPool};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of tasks waiting for a free worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of messages claimed per scheduler tick.
pub const DEFAULT_BATCH_SIZE: usize = 10;
