//! Message builders with sensible defaults.

use chrono::{DateTime, Utc};
use hookline_core::models::{
    EndpointMetadata, Message, MessageId, MessageMetadata, MessageStatus, RetryStrategy,
};
use serde_json::value::RawValue;

/// Default secret used by fixtures.
pub const TEST_SECRET: &str = "whsec_test_secret";

/// Builder for test messages.
///
/// Defaults: event `test.event`, data `{"test":true}`, no endpoints,
/// retry limit 3, interval 60 seconds, status pending.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: MessageId,
    event_type: String,
    data: String,
    endpoints: Vec<EndpointMetadata>,
    secret: String,
    metadata: MessageMetadata,
    status: MessageStatus,
    created_at: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            id: MessageId::new(),
            event_type: "test.event".to_string(),
            data: r#"{"test":true}"#.to_string(),
            endpoints: Vec::new(),
            secret: TEST_SECRET.to_string(),
            metadata: MessageMetadata::default(),
            status: MessageStatus::Pending,
            created_at: None,
        }
    }

    /// Sets the message ID.
    #[must_use]
    pub fn id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Sets the raw JSON data. Must be valid JSON.
    #[must_use]
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Appends an unsent endpoint.
    #[must_use]
    pub fn endpoint(mut self, target_url: impl Into<String>) -> Self {
        self.endpoints.push(EndpointMetadata::new(target_url));
        self
    }

    /// Appends an endpoint that has already acknowledged the message.
    #[must_use]
    pub fn sent_endpoint(mut self, target_url: impl Into<String>) -> Self {
        let mut endpoint = EndpointMetadata::new(target_url);
        endpoint.sent = true;
        self.endpoints.push(endpoint);
        self
    }

    /// Sets the signing secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.metadata.retry_limit = retry_limit;
        self
    }

    /// Sets the fixed retry interval.
    #[must_use]
    pub fn interval_seconds(mut self, interval_seconds: u64) -> Self {
        self.metadata.interval_seconds = interval_seconds;
        self
    }

    /// Sets the stored strategy label.
    #[must_use]
    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.metadata.strategy = strategy;
        self
    }

    /// Sets the number of passes already completed.
    #[must_use]
    pub fn trial_count(mut self, trial_count: u32) -> Self {
        self.metadata.trial_count = trial_count;
        self
    }

    /// Sets the earliest time of the next pass.
    #[must_use]
    pub fn next_send_time(mut self, next_send_time: DateTime<Utc>) -> Self {
        self.metadata.next_send_time = Some(next_send_time);
        self
    }

    /// Sets the message status.
    #[must_use]
    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets both creation and update timestamps.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the message.
    ///
    /// # Panics
    ///
    /// Panics if the data set with [`data`](Self::data) is not valid JSON.
    #[allow(clippy::expect_used)]
    pub fn build(self) -> Message {
        let created_at = self.created_at.unwrap_or_else(Utc::now);

        Message {
            id: self.id,
            event_type: self.event_type,
            data: RawValue::from_string(self.data).expect("fixture data must be valid JSON"),
            endpoints: self.endpoints,
            secret: self.secret,
            metadata: self.metadata,
            status: self.status,
            description: String::new(),
            created_at,
            updated_at: created_at,
        }
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
