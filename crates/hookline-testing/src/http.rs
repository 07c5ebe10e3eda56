//! Webhook endpoints backed by wiremock.
//!
//! Each [`MockEndpoint`] owns its own server, so its socket address doubles
//! as the expected peer address in attempt records.

use std::net::SocketAddr;

use wiremock::{matchers, Mock, MockServer, Request, ResponseTemplate};

/// Path every mock endpoint listens on.
pub const WEBHOOK_PATH: &str = "/webhook";

/// A webhook receiver for delivery tests.
///
/// Expectations set with [`expect_calls`](Self::expect_calls) are verified
/// when the endpoint is dropped.
pub struct MockEndpoint {
    server: MockServer,
}

impl MockEndpoint {
    /// Starts an endpoint with no responses mounted (wiremock answers 404).
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Starts an endpoint that always answers with `status`.
    pub async fn always(status: u16) -> Self {
        let endpoint = Self::start().await;
        endpoint.respond_with(ResponseTemplate::new(status)).await;
        endpoint
    }

    /// Mounts `response` for every POST to the webhook path.
    pub async fn respond_with(&self, response: ResponseTemplate) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(WEBHOOK_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Answers with `status` and expects exactly `calls` requests.
    pub async fn expect_calls(&self, status: u16, calls: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path(WEBHOOK_PATH))
            .respond_with(ResponseTemplate::new(status))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Full URL of the webhook path.
    pub fn url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.server.uri())
    }

    /// Socket address the server listens on.
    pub fn address(&self) -> SocketAddr {
        *self.server.address()
    }

    /// Requests received so far.
    pub async fn received(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Number of requests received so far.
    pub async fn received_count(&self) -> usize {
        self.received().await.len()
    }

    /// Underlying wiremock server.
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}
