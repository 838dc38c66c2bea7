//! Core executor trait and error type.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during a single fetch attempt.
///
/// These never reach API callers; they only decide whether the resulting
/// record carries a response.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connecting or sending the request failed.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    /// The attempt did not finish within the timeout.
    #[error("timeout elapsed after {0:?}")]
    Timeout(Duration),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Performs one fetch against a URL.
///
/// # Contract
///
/// - Exactly one attempt per call: no retries, no backoff.
/// - Must finish in bounded time; implementations enforce their own timeout.
/// - `Ok` carries the full response body, whatever the HTTP status.
#[async_trait::async_trait]
pub trait FetchExecutor: Send + Sync + 'static {
    /// Fetch `url` and return its body.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}
