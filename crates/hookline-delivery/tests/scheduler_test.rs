//! Integration tests for the due-message scheduler.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use hookline_core::models::MessageStatus;
use hookline_delivery::{
    client::DeliveryClient, queue, storage::mock::MockMessageRepository, DeliveryEngine,
    DeliveryError, EngineConfig, PassOutcome, Scheduler, SchedulerConfig,
};
use hookline_testing::{Clock, MessageBuilder, MockEndpoint, TestClock};

fn test_clock() -> TestClock {
    TestClock::at(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap())
}

fn config(batch_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        batch_size,
        poll_interval: Duration::from_millis(10),
        visibility_timeout: Duration::from_secs(30),
    }
}

#[tokio::test]
async fn tick_publishes_only_due_messages() -> Result<()> {
    let clock = test_clock();
    let now = clock.now_utc();
    let repository = MockMessageRepository::new();

    let fresh = MessageBuilder::new().build();
    let due_retry = MessageBuilder::new()
        .status(MessageStatus::Retry)
        .next_send_time(now - chrono::Duration::seconds(1))
        .build();
    let future_retry = MessageBuilder::new()
        .status(MessageStatus::Retry)
        .next_send_time(now + chrono::Duration::seconds(60))
        .build();
    let finished = MessageBuilder::new().status(MessageStatus::Success).build();

    let mut expected = vec![fresh.id, due_retry.id];
    expected.sort();
    for message in [fresh, due_retry, future_retry, finished] {
        repository.insert_message(message).await;
    }

    let (publisher, mut receiver) = queue::channel(8);
    let scheduler = Scheduler::new(Arc::new(repository.clone()), publisher, config(10))
        .with_clock(Arc::new(clock.clone()));

    assert_eq!(scheduler.tick().await?, 2);

    let mut published = Vec::new();
    while let Ok(queued) = receiver.try_recv() {
        published.push(queued.message.id);
    }
    published.sort();
    assert_eq!(published, expected);
    Ok(())
}

#[tokio::test]
async fn claimed_messages_stay_hidden_until_visibility_lapses() -> Result<()> {
    let clock = test_clock();
    let repository = MockMessageRepository::new();
    let message = MessageBuilder::new().build();
    let id = message.id;
    repository.insert_message(message).await;

    let (publisher, mut receiver) = queue::channel(8);
    let scheduler = Scheduler::new(Arc::new(repository.clone()), publisher, config(10))
        .with_clock(Arc::new(clock.clone()));

    assert_eq!(scheduler.tick().await?, 1);
    let stored = repository.stored_message(id).await.expect("message stored");
    assert_eq!(
        stored.metadata.next_send_time,
        Some(clock.now_utc() + chrono::Duration::seconds(30))
    );

    assert_eq!(scheduler.tick().await?, 0);

    clock.advance(Duration::from_secs(31));
    assert_eq!(scheduler.tick().await?, 1);

    assert_eq!(receiver.try_recv()?.message.id, id);
    assert_eq!(receiver.try_recv()?.message.id, id);
    Ok(())
}

#[tokio::test]
async fn reclaimed_copy_does_not_resend_to_delivered_endpoints() -> Result<()> {
    let clock = test_clock();
    let endpoint = MockEndpoint::always(200).await;
    let repository = MockMessageRepository::new();
    let message = MessageBuilder::new().endpoint(endpoint.url()).build();
    let id = message.id;
    repository.insert_message(message).await;

    let (publisher, mut receiver) = queue::channel(8);
    let scheduler = Scheduler::new(Arc::new(repository.clone()), publisher, config(10))
        .with_clock(Arc::new(clock.clone()));

    // The first copy sits in the queue past the visibility timeout
    assert_eq!(scheduler.tick().await?, 1);
    clock.advance(Duration::from_secs(31));
    assert_eq!(scheduler.tick().await?, 1);

    let mut first = receiver.try_recv()?.message;
    let mut second = receiver.try_recv()?.message;

    let engine = DeliveryEngine::new(
        DeliveryClient::with_defaults()?,
        Arc::new(repository.clone()),
        EngineConfig::default(),
    )
    .with_clock(Arc::new(clock.clone()));

    engine.deliver(&mut first).await?;
    let outcome = engine.deliver(&mut second).await?;

    assert!(matches!(outcome, PassOutcome::AlreadyTerminal { status: MessageStatus::Success }));
    assert_eq!(endpoint.received_count().await, 1);

    let stored = repository.stored_message(id).await.expect("message stored");
    assert_eq!(stored.metadata.trial_count, 1);
    assert_eq!(repository.recorded_attempts().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn tick_respects_batch_size_oldest_first() -> Result<()> {
    let clock = test_clock();
    let now = clock.now_utc();
    let repository = MockMessageRepository::new();

    let mut ids = Vec::new();
    for age in (1..=5).rev() {
        let message =
            MessageBuilder::new().created_at(now - chrono::Duration::minutes(age)).build();
        ids.push(message.id);
        repository.insert_message(message).await;
    }

    let (publisher, mut receiver) = queue::channel(8);
    let scheduler = Scheduler::new(Arc::new(repository.clone()), publisher, config(2))
        .with_clock(Arc::new(clock.clone()));

    assert_eq!(scheduler.tick().await?, 2);
    assert_eq!(receiver.try_recv()?.message.id, ids[0]);
    assert_eq!(receiver.try_recv()?.message.id, ids[1]);
    assert!(receiver.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn tick_surfaces_claim_errors() -> Result<()> {
    let repository = MockMessageRepository::new();
    repository.inject_claim_error("connection refused").await;

    let (publisher, _receiver) = queue::channel(8);
    let scheduler = Scheduler::new(Arc::new(repository.clone()), publisher, config(10));

    assert!(matches!(scheduler.tick().await, Err(DeliveryError::DatabaseError { .. })));
    assert_eq!(scheduler.tick().await?, 0);
    Ok(())
}

#[tokio::test]
async fn run_stops_when_cancelled() -> Result<()> {
    let repository = MockMessageRepository::new();
    let (publisher, _receiver) = queue::channel(8);
    let scheduler = Arc::new(Scheduler::new(Arc::new(repository), publisher, config(10)));
    let token = scheduler.cancellation_token();

    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(1), handle).await???;
    Ok(())
}

#[tokio::test]
async fn run_stops_when_queue_closes() -> Result<()> {
    let repository = MockMessageRepository::new();
    repository.insert_message(MessageBuilder::new().build()).await;

    let (publisher, receiver) = queue::channel(8);
    drop(receiver);
    let scheduler = Scheduler::new(Arc::new(repository), publisher, config(10));

    tokio::time::timeout(Duration::from_secs(1), scheduler.run()).await??;
    Ok(())
}
