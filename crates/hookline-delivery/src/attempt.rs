//! Construction of delivery attempt records.

use chrono::{DateTime, Utc};
use hookline_core::models::{
    AttemptId, AttemptStatus, EndpointMetadata, Message, MessageAttempt, API_VERSION,
};

use crate::client::TransportResult;

/// Builds the audit record for one transport call.
///
/// Pure: no I/O, no failure path. Both timestamps are set to `now`.
pub fn build_attempt(
    message: &Message,
    endpoint: &EndpointMetadata,
    result: &TransportResult,
    status: AttemptStatus,
    now: DateTime<Utc>,
) -> MessageAttempt {
    MessageAttempt {
        id: AttemptId::new(),
        message_id: message.id,
        endpoint_id: endpoint.id,
        api_version: API_VERSION.to_string(),
        url: result.url.clone(),
        method: result.method.clone(),
        ip_address: result.peer_addr.map(|addr| addr.to_string()).unwrap_or_default(),
        request_headers: result.request_headers.clone(),
        response_headers: result.response_headers.clone(),
        content_type: result.content_type().unwrap_or_default().to_string(),
        http_response_code: result.status.clone(),
        response_data: String::from_utf8_lossy(&result.body).into_owned(),
        error: result.error.clone().unwrap_or_default(),
        status,
        created_at: now,
        updated_at: now,
    }
}
