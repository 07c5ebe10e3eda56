//! Configuration for the Hookline delivery service.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookline_delivery::{
    client::{ClientConfig, DEFAULT_USER_AGENT},
    engine::DEFAULT_SIGNATURE_HEADER,
    EngineConfig, PoolConfig, SchedulerConfig, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKER_COUNT,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "hookline.toml";

/// Service configuration with defaults, file, and environment overrides.
///
/// Sources in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`hookline.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,
    /// Database connection idle timeout in seconds.
    ///
    /// Environment variable: `DATABASE_IDLE_TIMEOUT`
    #[serde(default = "default_idle_timeout", alias = "DATABASE_IDLE_TIMEOUT")]
    pub database_idle_timeout: u64,
    /// Maximum lifetime of database connections in seconds.
    ///
    /// Environment variable: `DATABASE_MAX_LIFETIME`
    #[serde(default = "default_max_lifetime", alias = "DATABASE_MAX_LIFETIME")]
    pub database_max_lifetime: u64,

    // Delivery
    /// Number of concurrent delivery workers.
    ///
    /// Environment variable: `WORKER_POOL_SIZE`
    #[serde(default = "default_worker_count", alias = "WORKER_POOL_SIZE")]
    pub worker_pool_size: usize,
    /// Deliveries waiting for a free worker before intake blocks.
    ///
    /// Environment variable: `WORKER_QUEUE_SIZE`
    #[serde(default = "default_queue_capacity", alias = "WORKER_QUEUE_SIZE")]
    pub worker_queue_size: usize,
    /// Capacity of the queue between scheduler and dispatch worker.
    ///
    /// Environment variable: `MESSAGE_QUEUE_SIZE`
    #[serde(default = "default_queue_capacity", alias = "MESSAGE_QUEUE_SIZE")]
    pub message_queue_size: usize,
    /// HTTP request timeout for webhook delivery in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,
    /// User agent sent with every delivery.
    ///
    /// Environment variable: `DELIVERY_USER_AGENT`
    #[serde(default = "default_user_agent", alias = "DELIVERY_USER_AGENT")]
    pub delivery_user_agent: String,
    /// Header carrying the payload signature. Empty disables signing.
    ///
    /// Environment variable: `SIGNATURE_HEADER`
    #[serde(default = "default_signature_header", alias = "SIGNATURE_HEADER")]
    pub signature_header: String,
    /// Time allowed for in-flight deliveries to finish on shutdown, in
    /// seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Scheduler
    /// Maximum messages claimed per scheduler tick.
    ///
    /// Environment variable: `SCHEDULER_BATCH_SIZE`
    #[serde(default = "default_batch_size", alias = "SCHEDULER_BATCH_SIZE")]
    pub scheduler_batch_size: usize,
    /// Wait between ticks that found nothing due, in milliseconds.
    ///
    /// Environment variable: `SCHEDULER_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms", alias = "SCHEDULER_POLL_INTERVAL_MS")]
    pub scheduler_poll_interval_ms: u64,
    /// How long a claimed message stays hidden from other schedulers, in
    /// seconds.
    ///
    /// Environment variable: `SCHEDULER_VISIBILITY_TIMEOUT_SECONDS`
    #[serde(
        default = "default_visibility_timeout",
        alias = "SCHEDULER_VISIBILITY_TIMEOUT_SECONDS"
    )]
    pub scheduler_visibility_timeout_seconds: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is unset or invalid.
    ///
    /// Environment variable: `LOG_FILTER`
    #[serde(default = "default_log_filter", alias = "LOG_FILTER")]
    pub log_filter: String,
    /// Emit logs as JSON lines instead of human-readable text.
    ///
    /// Environment variable: `LOG_JSON`
    #[serde(default, alias = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Loads configuration from defaults, `hookline.toml`, and the
    /// environment, then validates it.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the transport configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            user_agent: self.delivery_user_agent.clone(),
        }
    }

    /// Converts to the delivery engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig { signature_header: self.signature_header.clone() }
    }

    /// Converts to the worker pool configuration.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig { worker_count: self.worker_pool_size, queue_capacity: self.worker_queue_size }
    }

    /// Converts to the scheduler configuration.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.scheduler_batch_size,
            poll_interval: Duration::from_millis(self.scheduler_poll_interval_ms),
            visibility_timeout: Duration::from_secs(self.scheduler_visibility_timeout_seconds),
        }
    }

    /// Grace period for in-flight deliveries on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                // Scheme separator, no password present
                if !self.database_url[colon_pos + 1..].starts_with("//") {
                    let mut masked = self.database_url.clone();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.worker_queue_size == 0 {
            anyhow::bail!("worker_queue_size must be greater than 0");
        }

        if self.message_queue_size == 0 {
            anyhow::bail!("message_queue_size must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        if self.delivery_user_agent.trim().is_empty() {
            anyhow::bail!("delivery_user_agent must not be empty");
        }

        if !self.signature_header.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("signature_header is not a valid header name: {}", self.signature_header);
        }

        if self.scheduler_batch_size == 0 {
            anyhow::bail!("scheduler_batch_size must be greater than 0");
        }

        if self.scheduler_poll_interval_ms == 0 {
            anyhow::bail!("scheduler_poll_interval_ms must be greater than 0");
        }

        if self.scheduler_visibility_timeout_seconds <= self.delivery_timeout_seconds {
            anyhow::bail!(
                "scheduler_visibility_timeout_seconds must exceed delivery_timeout_seconds"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            database_idle_timeout: default_idle_timeout(),
            database_max_lifetime: default_max_lifetime(),
            worker_pool_size: default_worker_count(),
            worker_queue_size: default_queue_capacity(),
            message_queue_size: default_queue_capacity(),
            delivery_timeout_seconds: default_delivery_timeout(),
            delivery_user_agent: default_user_agent(),
            signature_header: default_signature_header(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            scheduler_batch_size: default_batch_size(),
            scheduler_poll_interval_ms: default_poll_interval_ms(),
            scheduler_visibility_timeout_seconds: default_visibility_timeout(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/hookline".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_signature_header() -> String {
    DEFAULT_SIGNATURE_HEADER.to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_log_filter() -> String {
    "info,hookline=debug".to_string()
}
