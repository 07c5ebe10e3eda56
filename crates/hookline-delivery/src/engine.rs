//! Per-message delivery pass.
//!
//! One call to [`DeliveryEngine::deliver`] runs a single pass over a
//! message's fan-out:
//!
//! ```text
//! ┌─────────┐  payload + signature   ┌───────────┐  per endpoint  ┌──────────┐
//! │ Message │───────────────────────▶│ Transport │───────────────▶│ Attempt  │
//! └─────────┘   (once per pass)      └───────────┘   (unsent only) └──────────┘
//!      │                                                               │
//!      ▼                                                               ▼
//! trial_count += 1, status ──────────────────────────────────▶ repository
//! ```
//!
//! Endpoints already marked sent are skipped, so retries only reach the
//! endpoints that have not acknowledged yet. Hitting the retry limit forces
//! `Failure` even when the final pass reached every endpoint.
//!
//! A queued copy can outlive the scheduler's visibility timeout and be
//! claimed twice. Before sending, the engine compares the copy's trial count
//! with the stored one and drops copies that another pass already advanced.
//! The final write is conditional on the same trial count, which catches
//! passes racing in other processes.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookline_core::{
    models::{AttemptStatus, Message, MessageAttempt, MessageStatus, RETRY_LIMIT_EXCEEDED},
    Clock, CoreError, RealClock,
};
use reqwest::Method;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, error, info, warn};

use crate::{
    attempt::build_attempt,
    client::DeliveryClient,
    error::{DeliveryError, Result},
    retry::{FixedInterval, RetryPolicy},
    signing::{HmacSha256Signer, PayloadSigner},
    storage::MessageRepository,
};

/// Default header carrying the payload signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hookline-Signature";

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Header the signature is sent in. Empty disables signing.
    pub signature_header: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { signature_header: DEFAULT_SIGNATURE_HEADER.to_string() }
    }
}

/// Body POSTed to every endpoint.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    data: &'a RawValue,
}

/// Result of a completed pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Message status after the pass.
    pub status: MessageStatus,
    /// Trial count after the pass.
    pub trial_count: u32,
    /// Attempts recorded during the pass, in endpoint order.
    pub attempts: Vec<MessageAttempt>,
    /// Endpoints skipped because they were already sent.
    pub skipped: usize,
    /// Whether the repository accepted the update.
    pub persisted: bool,
    /// Whether the update lost to a concurrent pass over the same message.
    pub conflicted: bool,
}

/// Outcome of [`DeliveryEngine::deliver`].
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// The pass ran and the message state was updated.
    Completed(PassReport),
    /// The message was already terminal; nothing was sent or persisted.
    AlreadyTerminal {
        /// Terminal status the message arrived with or was stored with.
        status: MessageStatus,
    },
    /// The queued copy is older than the stored message; nothing was sent.
    Superseded {
        /// Trial count of the queued copy.
        queued_trial_count: u32,
        /// Trial count found in the repository.
        stored_trial_count: u32,
    },
}

impl PassOutcome {
    /// Returns the report of a completed pass.
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyTerminal { .. } | Self::Superseded { .. } => None,
        }
    }
}

/// Runs delivery passes for messages.
///
/// Shared by every pool worker; holds no per-message state.
pub struct DeliveryEngine {
    client: DeliveryClient,
    repository: Arc<dyn MessageRepository>,
    signer: Arc<dyn PayloadSigner>,
    retry_policy: Arc<dyn RetryPolicy>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl DeliveryEngine {
    /// Creates an engine with HMAC-SHA256 signing, the fixed-interval retry
    /// policy and the system clock.
    pub fn new(
        client: DeliveryClient,
        repository: Arc<dyn MessageRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            client,
            repository,
            signer: Arc::new(HmacSha256Signer),
            retry_policy: Arc::new(FixedInterval),
            clock: Arc::new(RealClock::new()),
            config,
        }
    }

    /// Replaces the clock used for attempt timestamps and scheduling.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the payload signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn PayloadSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one delivery pass, mutating `message` in place and persisting it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Encoding` or `DeliveryError::Signing` when the
    /// payload cannot be prepared. Nothing is sent or persisted in that case.
    /// Transport and persistence failures never surface as `Err`.
    pub async fn deliver(&self, message: &mut Message) -> Result<PassOutcome> {
        if message.is_terminal() {
            debug!(
                message_id = %message.id,
                status = %message.status,
                "message already terminal, skipping pass"
            );
            return Ok(PassOutcome::AlreadyTerminal { status: message.status });
        }

        if let Some(outcome) = self.check_stored(message).await {
            return Ok(outcome);
        }

        let expected_trial_count = message.metadata.trial_count;
        let started_at = self.clock.now_utc();
        let (payload, signature) = self.prepare_payload(message)?;

        let mut all_sent = true;
        let mut skipped = 0;
        let mut attempts = Vec::with_capacity(message.pending_endpoints());

        for index in 0..message.endpoints.len() {
            if message.endpoints[index].sent {
                debug!(
                    message_id = %message.id,
                    endpoint_id = %message.endpoints[index].id,
                    "endpoint already received message"
                );
                skipped += 1;
                continue;
            }

            let target_url = message.endpoints[index].target_url.clone();
            let result = self
                .client
                .send(
                    &target_url,
                    Method::POST,
                    payload.clone(),
                    &self.config.signature_header,
                    &signature,
                )
                .await;

            let status = if result.is_success() {
                info!(
                    message_id = %message.id,
                    uri = %target_url,
                    status = %result.status,
                    duration_ms = result.duration.as_millis(),
                    "message sent"
                );
                message.endpoints[index].sent = true;
                AttemptStatus::Success
            } else {
                error!(
                    message_id = %message.id,
                    uri = %target_url,
                    status = %result.status,
                    duration_ms = result.duration.as_millis(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "message delivery failed"
                );
                message.endpoints[index].sent = false;
                all_sent = false;
                AttemptStatus::Failure
            };

            let attempt = build_attempt(
                message,
                &message.endpoints[index],
                &result,
                status,
                self.clock.now_utc(),
            );
            attempts.push(attempt);
        }

        conclude_pass(message, all_sent, started_at, self.retry_policy.as_ref());
        message.updated_at = self.clock.now_utc();

        match message.status {
            MessageStatus::Retry => warn!(
                message_id = %message.id,
                next_send_time = ?message.metadata.next_send_time,
                strategy = %message.metadata.strategy,
                trial_count = message.metadata.trial_count,
                retry_limit = message.metadata.retry_limit,
                "message scheduled for retry"
            ),
            MessageStatus::Failure => error!(
                message_id = %message.id,
                trial_count = message.metadata.trial_count,
                "retry limit exceeded"
            ),
            _ => {},
        }

        let update = self
            .repository
            .update_message_with_attempts(message, expected_trial_count, &attempts)
            .await;

        let (persisted, conflicted) = match update {
            Ok(()) => (true, false),
            Err(CoreError::Conflict(reason)) => {
                warn!(
                    message_id = %message.id,
                    reason = %reason,
                    "concurrent pass already updated message, discarding this pass"
                );
                (false, true)
            },
            Err(error) => {
                error!(
                    message_id = %message.id,
                    error = %error,
                    "failed to update message"
                );
                (false, false)
            },
        };

        Ok(PassOutcome::Completed(PassReport {
            status: message.status,
            trial_count: message.metadata.trial_count,
            attempts,
            skipped,
            persisted,
            conflicted,
        }))
    }

    /// Compares the queued copy with the stored message.
    ///
    /// Returns an outcome when the pass must not run. A missing row or a
    /// failed lookup lets the pass proceed; the conditional write still
    /// guards the result.
    async fn check_stored(&self, message: &Message) -> Option<PassOutcome> {
        let stored = match self.repository.find_message(message.id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(error) => {
                warn!(
                    message_id = %message.id,
                    error = %error,
                    "failed to reload message, delivering queued copy"
                );
                return None;
            },
        };

        if stored.metadata.trial_count != message.metadata.trial_count {
            warn!(
                message_id = %message.id,
                queued_trial_count = message.metadata.trial_count,
                stored_trial_count = stored.metadata.trial_count,
                "queued copy is stale, skipping pass"
            );
            return Some(PassOutcome::Superseded {
                queued_trial_count: message.metadata.trial_count,
                stored_trial_count: stored.metadata.trial_count,
            });
        }

        if stored.is_terminal() {
            debug!(
                message_id = %message.id,
                status = %stored.status,
                "stored message already terminal, skipping pass"
            );
            return Some(PassOutcome::AlreadyTerminal { status: stored.status });
        }

        None
    }

    fn prepare_payload(&self, message: &Message) -> Result<(Bytes, String)> {
        let payload = serde_json::to_vec(&WebhookPayload {
            event: &message.event_type,
            data: &message.data,
        })
        .map_err(|e| {
            error!(message_id = %message.id, error = %e, "failed to encode payload");
            DeliveryError::encoding(e.to_string())
        })?;

        if self.config.signature_header.is_empty() {
            return Ok((Bytes::from(payload), String::new()));
        }

        let signature = self.signer.sign(&message.secret, &payload).map_err(|e| {
            error!(message_id = %message.id, error = %e, "failed to sign payload");
            DeliveryError::signing(e.to_string())
        })?;

        Ok((Bytes::from(payload), signature))
    }
}

/// Applies the end-of-pass state transition.
///
/// Increments the trial count, then sets `Success` if every endpoint is sent
/// or `Retry` with a new `next_send_time` otherwise. Reaching the retry limit
/// overrides either outcome with `Failure`.
pub fn conclude_pass(
    message: &mut Message,
    all_sent: bool,
    started_at: DateTime<Utc>,
    retry_policy: &dyn RetryPolicy,
) {
    message.metadata.trial_count = message.metadata.trial_count.saturating_add(1);

    if all_sent {
        message.status = MessageStatus::Success;
    } else {
        message.status = MessageStatus::Retry;
        message.metadata.next_send_time =
            Some(retry_policy.next_send_time(&message.metadata, started_at));
    }

    if message.metadata.trial_count >= message.metadata.retry_limit {
        message.status = MessageStatus::Failure;
        message.description = RETRY_LIMIT_EXCEEDED.to_string();
    }
}
