//! HTTP retry helper with exponential backoff.
//!
//! Retries on network errors, 429, and 5xx. Other statuses are returned to
//! the caller as-is.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(30);

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send the request built by `build` up to `1 + max_retries` times.
pub async fn send_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<reqwest::Response, String> {
    let mut delay = INITIAL_DELAY;

    for attempt in 0..=max_retries {
        let last = attempt == max_retries;
        match build().send().await {
            Ok(response) if !retryable(response.status()) || last => return Ok(response),
            Ok(response) => {
                warn!(
                    "request got {}, retry {}/{max_retries} in {delay:?}",
                    response.status(),
                    attempt + 1
                );
            }
            Err(err) if last => return Err(format!("request failed: {err}")),
            Err(err) => {
                warn!("request error: {err}, retry {}/{max_retries} in {delay:?}", attempt + 1);
            }
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, MAX_DELAY);
    }

    Err("request failed: retries exhausted".to_string())
}
