//! JSON/HTTP client for the indexing service.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use indexer_orchestrator::{BatchExecutor, StatusProvider};
use indexer_types::{
    ActiveJob, BatchRequest, BatchResponse, CollaboratorError, JobId, JobType, Settings,
    StatusSnapshot,
};

use crate::error::ClientError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`HttpIndexerClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service base URL (e.g., "https://forum.example.com/indexing")
    pub base_url: String,

    /// Bearer token, if the service requires one
    pub api_key: Option<SecretString>,

    /// Per-request timeout
    pub timeout: Duration,

    /// Attempts for idempotent reads before giving up
    pub max_read_attempts: u32,

    /// First delay between read attempts
    pub read_retry_backoff: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_read_attempts: 3,
            read_retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_read_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.max_read_attempts = attempts.max(1);
        self.read_retry_backoff = backoff;
        self
    }

    /// Client settings taken from the layered application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let config = Self::new(settings.endpoint.clone()).with_timeout(settings.request_timeout());
        match &settings.api_key {
            Some(key) if !key.is_empty() => config.with_api_key(key.clone()),
            _ => config,
        }
    }
}

/// Indexing service client implementing both collaborator traits.
pub struct HttpIndexerClient {
    client: Client,
    base_url: Url,
    config: ClientConfig,
}

impl HttpIndexerClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidEndpoint` if the base URL does not parse
    /// or cannot carry a path, and `ClientError::Config` if the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CollaboratorError> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(CollaboratorError::Rejected {
            status: status.as_u16(),
            message: error_body(response).await,
        })
    }

    /// GET a JSON document, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CollaboratorError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.read_retry_backoff,
            current_interval: self.config.read_retry_backoff,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(url = %url, attempt = attempts, "GET");

            let result = match self.send(self.client.get(url.clone())).await {
                Ok(response) => decode(response).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < self.config.max_read_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.read_retry_backoff);
                    warn!(
                        url = %url,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Status read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl BatchExecutor for HttpIndexerClient {
    async fn execute_batch(
        &self,
        request: &BatchRequest,
    ) -> Result<BatchResponse, CollaboratorError> {
        let url = self.url(&["jobs", request.job_type.as_str(), "batches"]);
        debug!(
            url = %url,
            job_id = %request.job_id,
            batch_size = request.batch_size,
            "POST batch"
        );

        let response = self
            .authorize(self.client.post(url))
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            // counts travel in the body; without them the signal is unusable
            let body = response.text().await.map_err(map_transport)?;
            return match serde_json::from_str::<BatchResponse>(&body) {
                Ok(batch) => Ok(BatchResponse {
                    credits_exhausted: true,
                    ..batch
                }),
                Err(_) => Err(CollaboratorError::Rejected {
                    status: status.as_u16(),
                    message: truncate(&body),
                }),
            };
        }
        if !status.is_success() {
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                message: error_body(response).await,
            });
        }

        decode(response).await
    }

    async fn request_stop(&self, job_id: &JobId) -> Result<(), CollaboratorError> {
        let url = self.url(&["jobs", job_id.as_str(), "stop"]);
        debug!(url = %url, "POST stop");
        self.send(self.client.post(url)).await.map(|_| ())
    }
}

#[async_trait]
impl StatusProvider for HttpIndexerClient {
    async fn get_status(&self, job_id: &JobId) -> Result<StatusSnapshot, CollaboratorError> {
        self.get_json(self.url(&["jobs", job_id.as_str(), "status"]))
            .await
    }

    async fn get_active_job(&self, job_type: &JobType) -> Result<ActiveJob, CollaboratorError> {
        self.get_json(self.url(&["jobs", job_type.as_str(), "active"]))
            .await
    }
}

fn map_transport(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else if err.is_decode() {
        CollaboratorError::Decode(err.to_string())
    } else {
        CollaboratorError::Transport(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CollaboratorError> {
    let bytes = response.bytes().await.map_err(map_transport)?;
    serde_json::from_slice(&bytes).map_err(|e| CollaboratorError::Decode(e.to_string()))
}

async fn error_body(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    truncate(&body)
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::BatchOptions;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpIndexerClient {
        let config = ClientConfig::new(format!("{}/indexing/", server.uri()))
            .with_api_key("secret-token")
            .with_read_retries(3, Duration::from_millis(5));
        HttpIndexerClient::new(config).unwrap()
    }

    fn request() -> BatchRequest {
        BatchRequest {
            job_id: JobId::from("job-1"),
            job_type: JobType::new("topics"),
            batch_size: 5,
            options: BatchOptions::only_tagged("faq"),
        }
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = HttpIndexerClient::new(ClientConfig::new("not a url"));
        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));

        let result = HttpIndexerClient::new(ClientConfig::new("mailto:ops@example.com"));
        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_url_building() {
        let client = HttpIndexerClient::new(ClientConfig::new("http://localhost:3000/indexing/"))
            .unwrap();
        let url = client.url(&["jobs", "external content", "active"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/indexing/jobs/external%20content/active"
        );
    }

    #[test]
    fn test_truncate_keeps_char_boundary() {
        let body = "é".repeat(400);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= MAX_ERROR_BODY + 3);
    }

    #[tokio::test]
    async fn test_execute_batch_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexing/jobs/topics/batches"))
            .and(header("Authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({
                "job_id": "job-1",
                "batch_size": 5,
                "options": {"only_tagged": "faq"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "processed": 5,
                "remaining": 5,
                "done": false,
                "errors": ["topic 12: empty body"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client_for(&server).execute_batch(&request()).await.unwrap();
        assert_eq!(response.processed, 5);
        assert_eq!(response.remaining, 5);
        assert_eq!(response.errors.len(), 1);
        assert!(!response.credits_exhausted);
    }

    #[tokio::test]
    async fn test_execute_batch_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexing/jobs/topics/batches"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .execute_batch(&request())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, CollaboratorError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_payment_required_means_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexing/jobs/topics/batches"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "processed": 3,
                "remaining": 7,
                "done": false
            })))
            .mount(&server)
            .await;

        let response = client_for(&server).execute_batch(&request()).await.unwrap();
        assert!(response.credits_exhausted);
        assert_eq!(response.processed, 3);
        assert_eq!(response.remaining, 7);
    }

    #[tokio::test]
    async fn test_status_read_retries_transient_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexing/jobs/job-1/status"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/indexing/jobs/job-1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "worker_active": false,
                "queue_non_empty": true,
                "processed": 40,
                "total": 100
            })))
            .mount(&server)
            .await;

        let snapshot = client_for(&server)
            .get_status(&JobId::from("job-1"))
            .await
            .unwrap();
        assert!(snapshot.queue_non_empty);
        assert_eq!(snapshot.processed, 40);
        assert_eq!(snapshot.credits_remaining, None);
    }

    #[tokio::test]
    async fn test_status_read_gives_up_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexing/jobs/job-1/status"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown job"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_status(&JobId::from("job-1"))
            .await
            .unwrap_err();
        match err {
            CollaboratorError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "unknown job");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_active_job_decodes_partial_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexing/jobs/topics/active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "active": true,
                "total": 100,
                "processed": 40,
                "remaining": 60
            })))
            .mount(&server)
            .await;

        let active = client_for(&server)
            .get_active_job(&JobType::new("topics"))
            .await
            .unwrap();
        assert!(active.active);
        assert_eq!(active.total, Some(100));
        assert!(active.job_id.is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexing/jobs/topics/active"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_active_job(&JobType::new("topics"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Decode(_)));
    }

    #[tokio::test]
    async fn test_request_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexing/jobs/job-1/stop"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .request_stop(&JobId::from("job-1"))
            .await
            .unwrap();
    }
}
