//! PostgreSQL repository tests.
//!
//! Require a reachable database in `DATABASE_URL`; run with
//! `cargo test -p hookline-core -- --ignored`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use hookline_core::{
    models::{
        AttemptId, AttemptStatus, EndpointMetadata, Message, MessageAttempt, MessageId,
        MessageMetadata, MessageStatus, API_VERSION,
    },
    storage::Storage,
    CoreError,
};
use serde_json::value::RawValue;
use sqlx::postgres::PgPoolOptions;

async fn storage() -> Result<Storage> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new().max_connections(4).connect(&url).await?;
    let storage = Storage::new(pool);
    storage.ensure_schema().await?;
    Ok(storage)
}

/// Postgres keeps microseconds.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn message(created_at: DateTime<Utc>) -> Result<Message> {
    Ok(Message {
        id: MessageId::new(),
        event_type: "order.created".to_string(),
        data: RawValue::from_string(r#"{"order": 7}"#.to_string())?,
        endpoints: vec![EndpointMetadata::new("https://a.test/hook")],
        secret: "whsec".to_string(),
        metadata: MessageMetadata::default(),
        status: MessageStatus::Pending,
        description: String::new(),
        created_at,
        updated_at: created_at,
    })
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn create_and_find_round_trip() -> Result<()> {
    let storage = storage().await?;
    let message = message(now())?;

    storage.messages.create(&message).await?;
    let found = storage.messages.find_by_id(message.id).await?.context("message exists")?;

    assert_eq!(found.event_type, message.event_type);
    assert_eq!(found.endpoints, message.endpoints);
    assert_eq!(found.metadata, message.metadata);
    assert_eq!(found.status, MessageStatus::Pending);
    assert_eq!(found.created_at, message.created_at);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn update_in_tx_persists_message_and_attempt() -> Result<()> {
    let storage = storage().await?;
    let mut message = message(now())?;
    storage.messages.create(&message).await?;

    message.endpoints[0].sent = true;
    message.metadata.trial_count = 1;
    message.status = MessageStatus::Success;
    message.updated_at = now();

    let attempt = MessageAttempt {
        id: AttemptId::new(),
        message_id: message.id,
        endpoint_id: message.endpoints[0].id,
        api_version: API_VERSION.to_string(),
        url: message.endpoints[0].target_url.clone(),
        method: "POST".to_string(),
        ip_address: "127.0.0.1:443".to_string(),
        request_headers: HashMap::from([("x-signature".to_string(), "abc".to_string())]),
        response_headers: HashMap::new(),
        content_type: String::new(),
        http_response_code: "200 OK".to_string(),
        response_data: "ok".to_string(),
        error: String::new(),
        status: AttemptStatus::Success,
        created_at: message.updated_at,
        updated_at: message.updated_at,
    };

    let mut tx = storage.begin().await?;
    storage.messages.update_in_tx(&mut tx, &message, 0).await?;
    storage.message_attempts.create_in_tx(&mut tx, &attempt).await?;
    tx.commit().await?;

    let found = storage.messages.find_by_id(message.id).await?.context("message exists")?;
    assert_eq!(found.status, MessageStatus::Success);
    assert!(found.endpoints[0].sent);

    let attempts = storage.message_attempts.find_by_message(message.id).await?;
    assert_eq!(attempts, vec![attempt]);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn update_unknown_message_is_not_found() -> Result<()> {
    let storage = storage().await?;
    let message = message(now())?;

    let result = storage.messages.update(&message, 0).await;
    assert!(matches!(result, Err(CoreError::NotFound(_))));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn update_from_stale_trial_count_conflicts() -> Result<()> {
    let storage = storage().await?;
    let mut message = message(now())?;
    storage.messages.create(&message).await?;

    message.metadata.trial_count = 1;
    message.endpoints[0].sent = true;
    storage.messages.update(&message, 0).await?;

    // A second pass that also started from trial 0 must not overwrite
    let mut stale = message.clone();
    stale.endpoints[0].sent = false;
    let result = storage.messages.update(&stale, 0).await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));

    let found = storage.messages.find_by_id(message.id).await?.context("message exists")?;
    assert_eq!(found.metadata.trial_count, 1);
    assert!(found.endpoints[0].sent);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn claim_due_hides_claimed_messages() -> Result<()> {
    let storage = storage().await?;
    // Far-past creation time so these sort ahead of rows left by other runs
    let created_at = now() - Duration::days(365 * 50);
    let message = message(created_at)?;
    storage.messages.create(&message).await?;

    let claim_time = now();
    let visible_until = claim_time + Duration::seconds(60);
    let claimed = storage.messages.claim_due(1, claim_time, visible_until).await?;

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, message.id);
    assert_eq!(claimed[0].metadata.next_send_time, Some(visible_until));

    let again = storage.messages.claim_due(100, claim_time, visible_until).await?;
    assert!(again.iter().all(|m| m.id != message.id));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn health_check_succeeds() -> Result<()> {
    storage().await?.health_check().await?;
    Ok(())
}
