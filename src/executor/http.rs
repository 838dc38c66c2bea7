//! HTTP GET executor.

use std::time::Duration;

use reqwest::Client;
use tokio::time::timeout;

use super::traits::{FetchError, FetchExecutor};

/// Default fetch timeout (5 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches target URLs with a plain HTTP GET.
///
/// The timeout bounds the whole attempt: connect, send and body read.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
}

impl HttpExecutor {
    /// Create an executor with the given timeout.
    ///
    /// # Errors
    /// Returns `FetchError::Client` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, timeout })
    }

    /// Create an executor with [`DEFAULT_TIMEOUT`].
    pub fn with_default_timeout() -> Result<Self, FetchError> {
        Self::new(DEFAULT_TIMEOUT)
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, err: reqwest::Error, wrap: fn(reqwest::Error) -> FetchError) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            wrap(err)
        }
    }
}

impl std::fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl FetchExecutor for HttpExecutor {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let attempt = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| self.classify(e, FetchError::Request))?;

            tracing::trace!(url = %url, status = response.status().as_u16(), "Response received");

            response
                .text()
                .await
                .map_err(|e| self.classify(e, FetchError::Body))
        };

        match timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        }
    }
}
