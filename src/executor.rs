//! Fetch execution.
//!
//! A [`FetchExecutor`] performs one request against a URL; [`dispatch`]
//! wraps it with timing and turns the outcome into a [`FetchRecord`].
//! Failures never escape: they are logged and recorded with an absent
//! response.
//!
//! - [`HttpExecutor`]: reqwest-backed GET with a fixed timeout

mod http;
mod traits;

pub use http::{DEFAULT_TIMEOUT, HttpExecutor};
pub use traits::{FetchError, FetchExecutor};

use chrono::Utc;
use tokio::time::Instant;

use crate::history::FetchRecord;

/// Run one fetch attempt against `url` and record its outcome.
///
/// The dispatch timestamp is captured before the request is issued; the
/// duration covers the whole attempt, successful or not.
pub async fn dispatch(executor: &dyn FetchExecutor, url: &str) -> FetchRecord {
    let dispatched_at = Utc::now();
    let start = Instant::now();

    let result = executor.fetch(url).await;
    let elapsed = start.elapsed();

    let response = match result {
        Ok(body) => {
            tracing::debug!(url = %url, elapsed_ms = elapsed.as_millis(), bytes = body.len(), "Fetch completed");
            Some(body)
        }
        Err(e) => {
            tracing::warn!(url = %url, elapsed_ms = elapsed.as_millis(), error = %e, "Fetch failed");
            None
        }
    };

    FetchRecord::new(dispatched_at, elapsed, response)
}
