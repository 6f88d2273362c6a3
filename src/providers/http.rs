//! Shared HTTP plumbing for the REST collaborators.
//!
//! - one `reqwest::Client` per collaborator with User-Agent + gzip
//! - exponential backoff (base → 2x → 4x …, capped) with ±20% jitter
//! - retries only errors whose code is retryable (429, timeouts, connect)

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE, USER_AGENT};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{MAX_RETRY_MS, RETRY_JITTER_PERCENT, USER_AGENT as USER_AGENT_CONST};

/// Build an HTTP client with the scanner's default headers
pub fn build_client(timeout: Duration) -> AppResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_CONST));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(|e| AppError::with_source(ErrorCode::ConfigInvalidValue, "Failed to build HTTP client", e))
}

/// Delay before retry number `attempt` (1-based)
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exp = attempt.saturating_sub(1).min(16);
    let capped = base_ms.saturating_mul(1u64 << exp).min(MAX_RETRY_MS.max(base_ms));

    let jitter_range = (capped * RETRY_JITTER_PERCENT / 100) as i64;
    let jitter: i64 = if jitter_range > 0 {
        rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        0
    };
    Duration::from_millis((capped as i64 + jitter).max(100) as u64)
}

/// Run `op` up to `max_retries + 1` times, backing off between retryable failures
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_retries: u32,
    base: Duration,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.code.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(attempt, base);
                if e.code == ErrorCode::ExplorerRateLimited {
                    warn!(
                        "⏳ {} rate limited, backing off {}ms (retry {}/{})",
                        label,
                        delay.as_millis(),
                        attempt,
                        max_retries
                    );
                } else {
                    debug!(
                        "⏳ {} failed ({}), retry {}/{} after {}ms",
                        label,
                        e,
                        attempt,
                        max_retries,
                        delay.as_millis()
                    );
                }
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Which kind of collaborator answered, so failures carry the right code family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Explorer,
    Analyzer,
    VectorStore,
}

/// Map a non-success HTTP status to an error
pub fn status_error(upstream: Upstream, service: &str, status: reqwest::StatusCode) -> AppError {
    let message = format!("{} returned HTTP {}", service, status);
    match (upstream, status.as_u16()) {
        (Upstream::Explorer, 429) => AppError::explorer_rate_limited(),
        (Upstream::Explorer, 500..=599) => AppError::explorer_unavailable(message),
        (Upstream::Explorer, _) => AppError::explorer_invalid(message),
        (Upstream::Analyzer, 408 | 504) => AppError::analyzer_timeout(message),
        (Upstream::Analyzer, _) => AppError::analyzer_failed(message),
        (Upstream::VectorStore, _) => AppError::vector_store(message),
    }
}
