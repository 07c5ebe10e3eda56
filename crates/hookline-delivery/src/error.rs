//! Error types for webhook delivery operations.
//!
//! Transport errors never abort a pass; they are rendered into the attempt
//! record through their `Display` form. Encoding and signing errors abort the
//! pass before any endpoint is called. Lifecycle errors surface from the
//! worker, pool and scheduler.

use std::time::Duration;

use hookline_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout:?}")]
    Timeout {
        /// Client timeout that elapsed
        timeout: Duration,
    },

    /// Response headers arrived but the body could not be read.
    #[error("response body read failed: {message}")]
    BodyRead {
        /// Error message describing the read failure
        message: String,
    },

    /// Outgoing payload could not be serialized.
    #[error("payload encoding failed: {message}")]
    Encoding {
        /// Serializer error message
        message: String,
    },

    /// Outgoing payload could not be signed.
    #[error("payload signing failed: {message}")]
    Signing {
        /// Signer error message
        message: String,
    },

    /// Database operation failed.
    #[error("database error: {message}")]
    DatabaseError {
        /// Database error message
        message: String,
    },

    /// Invalid client, engine or pool configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// `start` was called on a worker that is already running.
    #[error("dispatch worker already started")]
    AlreadyStarted,

    /// The worker pool no longer accepts tasks.
    #[error("worker pool is closed")]
    PoolClosed,

    /// The message queue has no receiver left.
    #[error("message queue is closed")]
    QueueClosed,

    /// A pool worker panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker within the pool
        worker_id: usize,
        /// Join error description
        error: String,
    },

    /// The dispatch worker's intake loop panicked.
    #[error("intake loop failed: {error}")]
    IntakeFailed {
        /// Join error description
        error: String,
    },

    /// In-flight work did not finish within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that elapsed
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a response body read error.
    pub fn body_read(message: impl Into<String>) -> Self {
        Self::BodyRead { message: message.into() }
    }

    /// Creates a payload encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding { message: message.into() }
    }

    /// Creates a payload signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into() }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Returns true for errors produced by the HTTP transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout { .. } | Self::BodyRead { .. })
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::database(err.to_string())
    }
}
