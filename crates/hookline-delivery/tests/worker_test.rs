//! Integration tests for the dispatch worker lifecycle.
//!
//! Messages flow queue → intake loop → worker pool → engine → mock
//! repository, against real wiremock endpoints.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use hookline_core::models::MessageStatus;
use hookline_delivery::{
    client::DeliveryClient, queue, storage::mock::MockMessageRepository, DeliveryEngine,
    DeliveryError, DispatchWorker, EngineConfig, PoolConfig,
};
use hookline_testing::{LogCapture, MessageBuilder, MockEndpoint};
use wiremock::ResponseTemplate;

fn engine(repository: &MockMessageRepository) -> Result<Arc<DeliveryEngine>> {
    Ok(Arc::new(DeliveryEngine::new(
        DeliveryClient::with_defaults()?,
        Arc::new(repository.clone()),
        EngineConfig::default(),
    )))
}

fn pool_config() -> PoolConfig {
    PoolConfig { worker_count: 4, queue_capacity: 16 }
}

/// Polls `condition` every 10ms until it holds or five seconds pass.
async fn wait_until<F, Fut>(mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not met within 5s")
}

#[tokio::test]
async fn delivers_messages_from_queue() -> Result<()> {
    let endpoint = MockEndpoint::always(200).await;
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;
    assert!(worker.is_running());
    assert_eq!(worker.active_workers(), 4);

    let message = MessageBuilder::new().endpoint(endpoint.url()).build();
    let id = message.id;
    publisher.publish(message).await?;

    wait_until(|| {
        let repository = repository.clone();
        async move { repository.stored_status(id).await == Some(MessageStatus::Success) }
    })
    .await?;

    worker.shutdown(Duration::from_secs(5)).await?;
    assert_eq!(endpoint.received_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_in_flight_message_is_dropped() -> Result<()> {
    let capture = LogCapture::new();
    let _guard = capture.set_default();

    let endpoint = MockEndpoint::start().await;
    endpoint.expect_calls(200, 0).await;
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;

    let message = MessageBuilder::new().endpoint(endpoint.url()).build();
    let held = worker.registry().try_acquire(message.id).expect("lease is free");
    publisher.publish(message).await?;

    wait_until(|| {
        let capture = capture.clone();
        async move { capture.contains("message already in flight") }
    })
    .await?;

    assert_eq!(worker.registry().len(), 1);
    drop(held);
    assert!(worker.registry().is_empty());

    worker.shutdown(Duration::from_secs(5)).await?;
    assert_eq!(repository.update_count(), 0);
    Ok(())
}

#[tokio::test]
async fn close_does_not_wait_for_in_flight_delivery() -> Result<()> {
    let endpoint = MockEndpoint::start().await;
    endpoint.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500))).await;
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;

    let message = MessageBuilder::new().endpoint(endpoint.url()).build();
    let id = message.id;
    publisher.publish(message).await?;

    let endpoint_ref = &endpoint;
    wait_until(|| async move { endpoint_ref.received_count().await == 1 }).await?;

    tokio::time::timeout(Duration::from_millis(500), worker.close()).await??;
    assert!(!worker.is_running());
    assert!(publisher.is_closed());
    assert_eq!(repository.stored_status(id).await, None);

    // In-flight delivery still completes once the pool drains
    worker.shutdown(Duration::from_secs(5)).await?;
    assert_eq!(repository.stored_status(id).await, Some(MessageStatus::Success));
    Ok(())
}

#[tokio::test]
async fn shutdown_drains_in_flight_deliveries() -> Result<()> {
    let endpoint = MockEndpoint::start().await;
    endpoint.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300))).await;
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;

    let messages: Vec<_> =
        (0..3).map(|_| MessageBuilder::new().endpoint(endpoint.url()).build()).collect();
    let ids: Vec<_> = messages.iter().map(|message| message.id).collect();
    for message in messages {
        publisher.publish(message).await?;
    }

    let endpoint_ref = &endpoint;
    wait_until(|| async move { endpoint_ref.received_count().await == 3 }).await?;
    worker.shutdown(Duration::from_secs(5)).await?;

    for id in ids {
        assert_eq!(repository.stored_status(id).await, Some(MessageStatus::Success));
    }
    Ok(())
}

#[tokio::test]
async fn shutdown_times_out_on_slow_delivery() -> Result<()> {
    let endpoint = MockEndpoint::start().await;
    endpoint.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3))).await;
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;

    publisher.publish(MessageBuilder::new().endpoint(endpoint.url()).build()).await?;
    let endpoint_ref = &endpoint;
    wait_until(|| async move { endpoint_ref.received_count().await == 1 }).await?;

    let result = worker.shutdown(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(DeliveryError::ShutdownTimeout { .. })));
    Ok(())
}

#[tokio::test]
async fn start_twice_is_rejected() -> Result<()> {
    let repository = MockMessageRepository::new();
    let (_publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;

    assert!(matches!(worker.start(), Err(DeliveryError::AlreadyStarted)));
    worker.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn close_before_start_closes_input() -> Result<()> {
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.close().await?;

    assert!(publisher.is_closed());
    assert!(matches!(worker.start(), Err(DeliveryError::AlreadyStarted)));
    Ok(())
}

#[tokio::test]
async fn intake_exits_when_queue_closes() -> Result<()> {
    let repository = MockMessageRepository::new();
    let (publisher, receiver) = queue::channel(8);

    let mut worker = DispatchWorker::new(receiver, engine(&repository)?, pool_config());
    worker.start()?;
    drop(publisher);

    let worker_ref = &worker;
    wait_until(|| async move { !worker_ref.is_running() }).await?;
    worker.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}
