use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::utils::truncate_utf8;

// ============================================================================
// Stock Service Client
// ============================================================================
//
// One GET per call, no retry and no caching. Failures are classified so the
// caller can decide between redelivery and dead-lettering:
//
//   200            -> body parsed leniently ("true" => available, else not)
//   5xx            -> ServerError       (retryable)
//   connect/timeout-> Unreachable       (retryable)
//   anything else  -> UnexpectedStatus / Transport (not retryable)
//
// Non-200 bodies are read best-effort and cut to MAX_ERROR_BODY_BYTES; they
// end up in logs and dead-letter headers.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StockCheckError {
    #[error("Stock service returned server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Stock service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Stock service returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Stock service request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl StockCheckError {
    /// True when an identical call later on might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockCheckError::ServerError { .. } | StockCheckError::Unreachable(_))
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            StockCheckError::Unreachable(err)
        } else {
            StockCheckError::Transport(err)
        }
    }
}

/// Answers whether an item is in stock
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    async fn check_availability(&self, item: &str) -> Result<bool, StockCheckError>;
}

pub struct StockServiceClient {
    client: Client,
    endpoint: String,
}

impl StockServiceClient {
    /// `timeout` bounds the whole request, body included
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Longest error body kept in a `StockCheckError`
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

fn truncate_body(body: String) -> String {
    truncate_utf8(body, MAX_ERROR_BODY_BYTES)
}

/// Anything other than a case-insensitive "true" means unavailable
pub fn parse_availability(body: &str) -> bool {
    body.trim().eq_ignore_ascii_case("true")
}

#[async_trait]
impl AvailabilityChecker for StockServiceClient {
    async fn check_availability(&self, item: &str) -> Result<bool, StockCheckError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("item", item)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, item = %item, "Stock service request failed");
                StockCheckError::from_transport(e)
            })?;

        let status = response.status();

        if status == StatusCode::OK {
            let body = response.text().await.map_err(StockCheckError::from_transport)?;
            let available = parse_availability(&body);
            tracing::debug!(item = %item, available = available, "Stock check completed");
            return Ok(available);
        }

        // Status decides the kind, the body is only context
        let body = truncate_body(response.text().await.unwrap_or_default());

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), item = %item, "Stock service server error");
            return Err(StockCheckError::ServerError { status: status.as_u16(), body });
        }

        tracing::error!(status = status.as_u16(), item = %item, "Unexpected stock service status");
        Err(StockCheckError::UnexpectedStatus { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn stub(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/api/stock"))
            .and(query_param("item", "my-item"))
            .respond_with(response)
            .expect(1)
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> StockServiceClient {
        let endpoint = format!("{}/api/stock", server.uri());
        StockServiceClient::new(endpoint, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_parse_availability_is_lenient() {
        assert!(parse_availability("true"));
        assert!(parse_availability("TRUE\n"));
        assert!(!parse_availability("false"));
        assert!(!parse_availability("yes"));
        assert!(!parse_availability(""));
    }

    #[tokio::test]
    async fn test_check_availability_success() {
        let server = MockServer::start().await;
        stub(&server, ResponseTemplate::new(200).set_body_string("true")).await;

        assert!(client_for(&server).check_availability("my-item").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_availability_non_boolean_body_is_unavailable() {
        let server = MockServer::start().await;
        stub(&server, ResponseTemplate::new(200).set_body_string("maybe")).await;

        assert!(!client_for(&server).check_availability("my-item").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_availability_server_error_is_retryable() {
        let server = MockServer::start().await;
        stub(&server, ResponseTemplate::new(503).set_body_string("Service unavailable")).await;

        let err = client_for(&server).check_availability("my-item").await.unwrap_err();
        assert!(matches!(err, StockCheckError::ServerError { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY_BYTES);
        let truncated = truncate_body(body);
        assert!(truncated.len() <= MAX_ERROR_BODY_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_body("short".to_string()), "short");
    }

    #[tokio::test]
    async fn test_check_availability_large_server_error_body_is_capped() {
        let server = MockServer::start().await;
        let body = "x".repeat(2 * 1024 * 1024);
        stub(&server, ResponseTemplate::new(500).set_body_string(body)).await;

        let err = client_for(&server).check_availability("my-item").await.unwrap_err();
        assert!(err.is_retryable());
        match err {
            StockCheckError::ServerError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY_BYTES);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_check_availability_client_error_is_not_retryable() {
        let server = MockServer::start().await;
        stub(&server, ResponseTemplate::new(400).set_body_string("bad request")).await;

        let err = client_for(&server).check_availability("my-item").await.unwrap_err();
        assert!(matches!(err, StockCheckError::UnexpectedStatus { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_check_availability_non_200_success_is_not_retryable() {
        let server = MockServer::start().await;
        stub(&server, ResponseTemplate::new(204)).await;

        let err = client_for(&server).check_availability("my-item").await.unwrap_err();
        assert!(matches!(err, StockCheckError::UnexpectedStatus { status: 204, .. }));
    }

    #[tokio::test]
    async fn test_check_availability_timeout_is_retryable() {
        let server = MockServer::start().await;
        stub(
            &server,
            ResponseTemplate::new(200)
                .set_body_string("true")
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let client = StockServiceClient::new(
            format!("{}/api/stock", server.uri()),
            Duration::from_millis(100),
        )
        .unwrap();

        let err = client.check_availability("my-item").await.unwrap_err();
        assert!(matches!(err, StockCheckError::Unreachable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_check_availability_connection_refused_is_retryable() {
        // Nothing listens on port 1
        let client = StockServiceClient::new("http://127.0.0.1:1/api/stock", Duration::from_secs(1))
            .unwrap();

        let err = client.check_availability("my-item").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
