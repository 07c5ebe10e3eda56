//! Hookline webhook delivery service.
//!
//! Loads configuration, connects to PostgreSQL, and runs the scheduler,
//! dispatch worker and delivery pool until Ctrl+C or SIGTERM.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookline_core::storage::Storage;
use hookline_delivery::{
    client::DeliveryClient,
    queue,
    storage::{MessageRepository, PostgresMessageRepository},
    DeliveryEngine, DispatchWorker, Scheduler,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    info!("Starting Hookline delivery service");
    info!(
        database_url = %config.database_url_masked(),
        worker_pool_size = config.worker_pool_size,
        signature_header = %config.signature_header,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    storage.ensure_schema().await.context("Failed to ensure database schema")?;
    info!("Database schema ready");

    let repository: Arc<dyn MessageRepository> =
        Arc::new(PostgresMessageRepository::new(storage));
    let client = DeliveryClient::new(config.to_client_config())?;
    let engine =
        Arc::new(DeliveryEngine::new(client, repository.clone(), config.to_engine_config()));

    let (publisher, receiver) = queue::channel(config.message_queue_size);

    let mut worker = DispatchWorker::new(receiver, engine, config.to_pool_config());
    worker.start()?;

    let scheduler = Scheduler::new(repository, publisher, config.to_scheduler_config());
    let scheduler_token = scheduler.cancellation_token();
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    info!("Hookline is delivering messages");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    scheduler_token.cancel();
    match scheduler_handle.await {
        Ok(Ok(())) => info!("Scheduler stopped"),
        Ok(Err(e)) => error!(error = %e, "Scheduler failed"),
        Err(e) => error!(error = %e, "Scheduler task panicked"),
    }

    if let Err(e) = worker.shutdown(config.shutdown_timeout()).await {
        error!(error = %e, "Dispatch worker did not shut down cleanly");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Hookline shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(fmt::layer().json().with_target(true)).try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true))
            .try_init()?;
    }

    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                Storage::new(pool.clone())
                    .health_check()
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
