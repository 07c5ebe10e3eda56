//! Core domain models and strongly-typed identifiers.
//!
//! Defines messages, their endpoint fan-out, delivery attempts and the newtype
//! ID wrappers that keep message, endpoint and attempt IDs from being mixed up.
//! Status enums carry their database text form through `Display` and
//! `FromStr`.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type BoxDynError = sqlx::error::BoxDynError;

/// Version tag stamped on every delivery attempt.
pub const API_VERSION: &str = "2021-08-27";

/// Description set on a message that exhausted its retry limit.
pub const RETRY_LIMIT_EXCEEDED: &str = "Retry limit exceeded";

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(Self(<Uuid as sqlx::Decode<PgDb>>::decode(value)?))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, BoxDynError> {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

uuid_id! {
    /// Strongly-typed message identifier.
    ///
    /// Follows a message through every delivery pass and links it to the
    /// attempts recorded for it.
    MessageId
}

uuid_id! {
    /// Strongly-typed endpoint identifier, unique within a message's fan-out.
    EndpointId
}

uuid_id! {
    /// Strongly-typed delivery attempt identifier.
    AttemptId
}

/// Error returned when a stored status or strategy label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseLabelError {}

/// Message delivery status.
///
/// ```text
/// Pending ──► Success
///    │  ▲
///    ▼  │
///  Retry ───► Failure
/// ```
///
/// `Success` and `Failure` are terminal. Transitions only happen as the
/// result of a delivery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created upstream, never dispatched.
    #[default]
    Pending,

    /// Every endpoint acknowledged with a 2xx response.
    Success,

    /// At least one endpoint is still outstanding and the retry limit has
    /// not been reached.
    Retry,

    /// Retry limit exhausted.
    Failure,
}

impl MessageStatus {
    /// Returns true for states no delivery pass will leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Retry => write!(f, "retry"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "retry" => Ok(Self::Retry),
            "failure" => Ok(Self::Failure),
            _ => Err(ParseLabelError { kind: "message status", value: s.to_string() }),
        }
    }
}

/// Outcome of a single HTTP call to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// No transport error and a 2xx status.
    Success,
    /// Anything else.
    Failure,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(ParseLabelError { kind: "attempt status", value: s.to_string() }),
        }
    }
}

/// Retry strategy label stored with each message.
///
/// Only the fixed interval is applied when scheduling; the label is kept so
/// other policies can key off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// Fixed interval between passes.
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Exponential backoff between passes.
    #[serde(rename = "exponential-backoff")]
    ExponentialBackoff,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::ExponentialBackoff => write!(f, "exponential-backoff"),
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "exponential-backoff" => Ok(Self::ExponentialBackoff),
            _ => Err(ParseLabelError { kind: "retry strategy", value: s.to_string() }),
        }
    }
}

/// Retry bookkeeping carried on each message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Number of completed delivery passes.
    pub trial_count: u32,

    /// Pass count at which the message is forced to `Failure`.
    pub retry_limit: u32,

    /// Delay between passes for the fixed-interval policy.
    pub interval_seconds: u64,

    /// Stored strategy label.
    pub strategy: RetryStrategy,

    /// Earliest time the next pass may run. `None` means immediately.
    pub next_send_time: Option<DateTime<Utc>>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            trial_count: 0,
            retry_limit: 3,
            interval_seconds: 60,
            strategy: RetryStrategy::Default,
            next_send_time: None,
        }
    }
}

/// One destination in a message's fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMetadata {
    /// Endpoint identifier.
    pub id: EndpointId,

    /// URL the payload is POSTed to.
    pub target_url: String,

    /// Whether this endpoint has acknowledged the message.
    ///
    /// Never reset once true, so retry passes skip it.
    pub sent: bool,
}

impl EndpointMetadata {
    /// Creates an endpoint that has not been sent yet.
    pub fn new(target_url: impl Into<String>) -> Self {
        Self { id: EndpointId::new(), target_url: target_url.into(), sent: false }
    }
}

/// One logical event to be delivered to a set of endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,

    /// Event name placed in the outgoing payload.
    pub event_type: String,

    /// Opaque JSON passed through to endpoints byte for byte.
    pub data: Box<RawValue>,

    /// Destinations, in dispatch order.
    pub endpoints: Vec<EndpointMetadata>,

    /// Key used to sign every outgoing payload.
    pub secret: String,

    /// Retry bookkeeping.
    pub metadata: MessageMetadata,

    /// Current delivery status.
    pub status: MessageStatus,

    /// Human-readable reason, set when the retry limit is exhausted.
    pub description: String,

    /// When the message was created.
    pub created_at: DateTime<Utc>,

    /// When the message was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Returns the number of endpoints that have not acknowledged yet.
    pub fn pending_endpoints(&self) -> usize {
        self.endpoints.iter().filter(|endpoint| !endpoint.sent).count()
    }

    /// Returns true once the message is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable audit record of one HTTP call to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttempt {
    /// Attempt identifier.
    pub id: AttemptId,

    /// Message that was delivered.
    pub message_id: MessageId,

    /// Endpoint that was called.
    pub endpoint_id: EndpointId,

    /// Fixed version tag, see [`API_VERSION`].
    pub api_version: String,

    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Resolved peer address, empty if no connection was obtained.
    pub ip_address: String,

    /// Headers sent with the request.
    pub request_headers: HashMap<String, String>,

    /// Headers returned by the endpoint.
    pub response_headers: HashMap<String, String>,

    /// Response `Content-Type`, empty if absent.
    pub content_type: String,

    /// Status line such as `"200 OK"`, empty if no response.
    pub http_response_code: String,

    /// Response body as lossy UTF-8.
    pub response_data: String,

    /// Transport error, empty on success.
    pub error: String,

    /// Attempt outcome.
    pub status: AttemptStatus,

    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,

    /// Equal to `created_at`; attempts are write-once.
    pub updated_at: DateTime<Utc>,
}

/// Queue envelope handed to the dispatch worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Message to deliver.
    pub message: Message,
}

impl From<Message> for QueuedMessage {
    fn from(message: Message) -> Self {
        Self { message }
    }
}
