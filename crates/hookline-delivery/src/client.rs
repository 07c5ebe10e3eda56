//! HTTP transport for webhook delivery.
//!
//! Sends one signed request to one endpoint and captures a normalized
//! [`TransportResult`]. Failures never surface as `Err`; they are recorded in
//! the result so the engine can turn them into an attempt record.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE, USER_AGENT},
    Method,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, Result},
    peer::{PeerSlot, RecordPeerLayer},
};

/// User agent sent with every delivery.
pub const DEFAULT_USER_AGENT: &str = "Hookline/v0.1";

/// Default client-wide request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout covering connect, send and body read.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, user_agent: DEFAULT_USER_AGENT.to_string() }
    }
}

/// Normalized outcome of one HTTP call.
#[derive(Debug, Clone, Default)]
pub struct TransportResult {
    /// Status line such as `"200 OK"`, empty when no response arrived.
    pub status: String,
    /// Numeric status, `None` when no response arrived.
    pub status_code: Option<u16>,
    /// Request method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Headers sent with the request.
    pub request_headers: HashMap<String, String>,
    /// Headers returned by the endpoint.
    pub response_headers: HashMap<String, String>,
    /// Raw response body.
    pub body: Bytes,
    /// Remote address of the connection, captured once it is obtained.
    pub peer_addr: Option<SocketAddr>,
    /// Transport error, if any.
    pub error: Option<String>,
    /// Wall time spent on the call.
    pub duration: Duration,
}

impl TransportResult {
    /// Returns true when no transport error occurred and the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.status_code, Some(200..=299))
    }

    /// Returns the response `Content-Type`, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.response_headers.get(CONTENT_TYPE.as_str()).map(String::as_str)
    }
}

/// HTTP client for webhook delivery.
///
/// Stateless apart from the connection pool it shares across all sends.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .connector_layer(RecordPeerLayer)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `payload` to `url`.
    ///
    /// Sets `signature_header: signature` only when the header name is
    /// non-empty, and always sets `Content-Type: application/json` and the
    /// configured user agent. The peer address is captured as soon as a
    /// connection is obtained, so it survives timeouts and body-read failures.
    pub async fn send(
        &self,
        url: &str,
        method: Method,
        payload: Bytes,
        signature_header: &str,
        signature: &str,
    ) -> TransportResult {
        let start_time = std::time::Instant::now();
        let span = info_span!("webhook_delivery", url = %url, method = %method);

        let mut result = async {
            let mut result = TransportResult {
                method: method.to_string(),
                url: url.to_string(),
                ..TransportResult::default()
            };

            let mut builder = self
                .client
                .request(method, url)
                .header(CONTENT_TYPE, "application/json")
                .header(USER_AGENT, &self.config.user_agent)
                .body(payload);

            if !signature_header.is_empty() {
                builder = builder.header(signature_header, signature);
            }

            let request = match builder.build() {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "failed to build delivery request");
                    result.error = Some(self.categorize(&e).to_string());
                    return result;
                },
            };

            result.request_headers = extract_headers(request.headers());

            let peer = PeerSlot::default();
            let response = peer.scope(self.client.execute(request)).await;
            result.peer_addr = peer.get();

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, peer = ?result.peer_addr, "request failed");
                    result.error = Some(self.categorize(&e).to_string());
                    return result;
                },
            };

            let status = response.status();
            result.status_code = Some(status.as_u16());
            result.status =
                format!("{} {}", status.as_str(), status.canonical_reason().unwrap_or(""))
                    .trim_end()
                    .to_string();
            result.response_headers = extract_headers(response.headers());
            // Pooled connections skip the connector
            result.peer_addr = response.remote_addr().or(result.peer_addr);

            match response.bytes().await {
                Ok(body) => result.body = body,
                Err(e) => {
                    warn!(error = %e, "failed to read response body");
                    result.error = Some(self.categorize(&e).to_string());
                },
            }

            result
        }
        .instrument(span.clone())
        .await;

        result.duration = start_time.elapsed();

        span.in_scope(|| {
            debug!(
                status = %result.status,
                duration_ms = result.duration.as_millis(),
                "delivery request finished"
            );
        });

        result
    }

    fn categorize(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            return DeliveryError::timeout(self.config.timeout);
        }
        if error.is_connect() {
            return DeliveryError::network(format!("connection failed: {error}"));
        }
        if error.is_body() || error.is_decode() {
            return DeliveryError::body_read(error_chain(error));
        }
        DeliveryError::network(error.to_string())
    }
}

/// Joins an error with its sources, outermost first.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

/// Extracts headers from reqwest HeaderMap into a standard HashMap.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.to_string(), value_str.to_string());
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn successful_send_captures_response() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("OK")
                    .insert_header("content-type", "text/plain"),
            )
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let url = format!("{}/webhook", mock_server.uri());
        let result = client.send(&url, Method::POST, Bytes::from("{}"), "", "").await;

        assert!(result.is_success());
        assert_eq!(result.status, "200 OK");
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.body, Bytes::from("OK"));
        assert_eq!(result.content_type(), Some("text/plain"));
        assert_eq!(result.method, "POST");
        assert_eq!(result.url, url);
        assert_eq!(result.peer_addr, Some(*mock_server.address()));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn non_2xx_is_not_success() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.send(&mock_server.uri(), Method::POST, Bytes::new(), "", "").await;

        assert!(!result.is_success());
        assert_eq!(result.status, "503 Service Unavailable");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn fixed_headers_always_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header("user-agent", DEFAULT_USER_AGENT))
            .and(matchers::header("x-hookline-signature", "abc123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let result = client
            .send(&mock_server.uri(), Method::POST, Bytes::from("{}"), "X-Hookline-Signature", "abc123")
            .await;

        assert!(result.is_success());
        assert_eq!(
            result.request_headers.get("x-hookline-signature").map(String::as_str),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn empty_signature_header_skips_signing() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        client.send(&mock_server.uri(), Method::POST, Bytes::from("{}"), "", "sig").await;

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("x-hookline-signature").is_none());
        assert!(requests[0].headers.values().all(|value| value != "sig"));
    }

    #[tokio::test]
    async fn connection_refused_records_error_only() {
        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.send("http://127.0.0.1:1/", Method::POST, Bytes::new(), "", "").await;

        assert!(!result.is_success());
        assert!(result.status.is_empty());
        assert!(result.status_code.is_none());
        assert!(result.peer_addr.is_none());
        assert!(result.error.as_deref().is_some_and(|e| e.starts_with("network connection failed")));
    }

    #[tokio::test]
    async fn invalid_url_records_error() {
        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.send("not a url", Method::POST, Bytes::new(), "", "").await;

        assert!(result.error.is_some());
        assert!(result.status_code.is_none());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_secs(1), ..ClientConfig::default() };
        let client = DeliveryClient::new(config).unwrap();
        let result = client.send(&mock_server.uri(), Method::POST, Bytes::new(), "", "").await;

        assert_eq!(result.error.as_deref(), Some("request timeout after 1s"));
        assert!(result.status_code.is_none());
        assert_eq!(result.peer_addr, Some(*mock_server.address()));
    }

    #[tokio::test]
    async fn sub_second_timeout_keeps_its_precision() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(300), ..ClientConfig::default() };
        let client = DeliveryClient::new(config).unwrap();
        let result = client.send(&mock_server.uri(), Method::POST, Bytes::new(), "", "").await;

        assert_eq!(result.error.as_deref(), Some("request timeout after 300ms"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error decoding response body")]
    struct DecodeFailure(#[source] std::io::Error);

    #[test]
    fn error_chain_includes_sources() {
        let cause = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed");

        assert_eq!(
            error_chain(&DecodeFailure(cause)),
            "error decoding response body: connection closed"
        );
    }
}
