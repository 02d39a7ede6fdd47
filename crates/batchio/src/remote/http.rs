//! JSON-over-HTTP remote operations.
//!
//! Plugs a POST endpoint into [`retry`] and [`BatchWriter`]:
//! - Transport errors and throttling/5xx statuses are retryable
//! - Every other non-2xx status is permanent
//! - Optional bearer authentication
//! - Batch endpoints answer with the items they did not process

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchWriteError, BatchWriter};
use crate::retry::{Classification, Classify, RetryError, RetryPolicy, retry};

const USER_AGENT: &str = concat!("batchio/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}")]
    Status { status: u16 },
}

/// Classifies [`HttpError`]s by status code.
#[derive(Debug, Clone)]
pub struct HttpStatusClassifier {
    pub retry_status_codes: Vec<u16>,
}

impl Default for HttpStatusClassifier {
    fn default() -> Self {
        Self {
            retry_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl Classify<HttpError> for HttpStatusClassifier {
    fn classify(&self, error: &HttpError) -> Classification {
        match error {
            // A request that cannot be built will not build next time either.
            HttpError::Transport(e) if e.is_builder() => Classification::Permanent,
            HttpError::Transport(e) => Classification::Retryable(e.to_string()),
            HttpError::Status { status } if self.retry_status_codes.contains(status) => {
                Classification::Retryable(format!("status {status}"))
            }
            HttpError::Status { .. } => Classification::Permanent,
        }
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    items: &'a [serde_json::Value],
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    unprocessed: Vec<serde_json::Value>,
}

/// Posts JSON payloads to one endpoint.
pub struct JsonPoster {
    url: String,
    client: reqwest::Client,
}

impl JsonPoster {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        Self::build(url.into(), None)
    }

    pub fn with_bearer_token(url: impl Into<String>, token: &str) -> Result<Self, HttpError> {
        Self::build(url.into(), Some(token))
    }

    fn build(url: String, bearer: Option<&str>) -> Result<Self, HttpError> {
        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(token) = bearer
            && let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send<B: Serialize + ?Sized>(&self, body: &B) -> Result<reqwest::Response, HttpError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(HttpError::Status {
                status: status.as_u16(),
            })
        }
    }

    /// POST `payload`, retrying per `policy`. Returns the success status code.
    pub async fn post<C>(
        &self,
        token: &CancellationToken,
        policy: &RetryPolicy<C>,
        payload: &serde_json::Value,
    ) -> Result<u16, RetryError<HttpError>>
    where
        C: Classify<HttpError>,
    {
        let result = retry(token, policy, || async {
            let response = self.send(payload).await?;
            Ok::<_, HttpError>(response.status().as_u16())
        })
        .await;

        if let Err(RetryError::Failed(ref e)) = result {
            tracing::error!(url = %self.url, error = %e, "POST failed");
        }
        result
    }

    /// Send one chunk as `{"items": [...]}`; the endpoint answers with
    /// `{"unprocessed": [...]}` (absent means everything was accepted).
    pub async fn submit_chunk(
        &self,
        chunk: Vec<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, HttpError> {
        let response = self.send(&BatchRequest { items: &chunk }).await?;
        let body: BatchResponse = response.json().await?;
        Ok(body.unprocessed)
    }

    /// Write `items` through `writer`, each chunk retried per `policy`.
    pub async fn write_batch<C>(
        &self,
        token: &CancellationToken,
        writer: &BatchWriter,
        policy: &RetryPolicy<C>,
        items: Vec<serde_json::Value>,
    ) -> Result<(), BatchWriteError<HttpError>>
    where
        C: Classify<HttpError>,
    {
        let result = writer
            .write_with_retry(token, policy, items, |chunk| self.submit_chunk(chunk))
            .await;

        if let Err(ref e) = result {
            tracing::error!(url = %self.url, error = %e, "Batch write failed");
        }
        result
    }
}
