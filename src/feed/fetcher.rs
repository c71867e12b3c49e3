use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use url::Url;

use crate::pipeline::{Interrupted, RunSignal};
use crate::util::excerpt;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
/// How much of an error response body is read for diagnostics
const ERROR_BODY_PREFIX: usize = 4 * 1024;
const ERROR_EXCERPT_CHARS: usize = 200;

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// Errors that can occur while retrieving a feed document.
///
/// A fetch is a single attempt: nothing here is retried, the next scheduled
/// run is the retry.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// HTTP response with a non-2xx status code
    #[error("HTTP error: status {status}: {excerpt}")]
    HttpStatus { status: u16, excerpt: String },
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The run deadline or a cancellation fired mid-request
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// HTTP client for feed documents.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body: usize,
}

impl FeedFetcher {
    /// Builds a fetcher with its own connection pool.
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    /// Wraps an existing client. `timeout` bounds each whole fetch.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_body: MAX_FEED_SIZE,
        }
    }

    /// Overrides the response body cap (10MB by default).
    pub fn with_body_limit(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Retrieves the raw bytes of the feed at `url`.
    ///
    /// The request and the body download together are bounded by the
    /// fetcher's timeout and by `signal`, whichever fires first.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Transport`] - Connection, DNS or TLS failure
    /// - [`FetchError::HttpStatus`] - Non-2xx status, with a short body excerpt
    /// - [`FetchError::Timeout`] - The fetch took longer than the timeout
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size cap
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    /// - [`FetchError::Interrupted`] - The run deadline or a cancellation fired
    pub async fn fetch(&self, url: &Url, signal: &RunSignal) -> Result<Vec<u8>, FetchError> {
        let attempt = tokio::time::timeout(self.timeout, self.fetch_once(url));
        let started = std::time::Instant::now();

        let result = signal
            .guard(attempt)
            .await?
            .map_err(|_| FetchError::Timeout(self.timeout))?;

        match &result {
            Ok(bytes) => tracing::debug!(
                url = %url,
                bytes = bytes.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetched feed"
            ),
            Err(e) => tracing::debug!(url = %url, error = %e, "Feed fetch failed"),
        }
        result
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_FEEDS)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let prefix = read_prefix(response, ERROR_BODY_PREFIX).await;
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                excerpt: excerpt(&String::from_utf8_lossy(&prefix), ERROR_EXCERPT_CHARS),
            });
        }

        read_limited_bytes(response, self.max_body).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Connection dropped mid-body
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

/// Reads at most `limit` bytes of a body, ignoring transport errors.
async fn read_prefix(response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(Ok(chunk)) = stream.next().await {
        let room = limit - bytes.len();
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if bytes.len() >= limit {
            break;
        }
    }
    bytes
}
