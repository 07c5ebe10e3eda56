//! Core domain models and storage for webhook message delivery.
//!
//! Provides the message, endpoint and attempt types shared by every Hookline
//! crate, the clock abstraction used for deterministic scheduling, and the
//! PostgreSQL repositories that persist delivery state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AttemptId, AttemptStatus, EndpointId, EndpointMetadata, Message, MessageAttempt, MessageId,
    MessageMetadata, MessageStatus, RetryStrategy,
};
pub use time::{Clock, RealClock, TestClock};
