//! Exponential backoff for the KMA and geocoder HTTP calls.
//!
//! Retried: timeouts, connection failures, 5xx, 408 and 429.
//! Not retried: other 4xx (bad key, bad grid, unknown path).

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};

use crate::types::WeatherError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 8000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error.status().is_some_and(is_retryable_status)
}

/// Run `operation` until it yields a non-retryable outcome or retries run out.
///
/// A retryable status on the final attempt is returned as the response so
/// the caller can report the body.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, operation: F) -> Result<Response, WeatherError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 0;

    loop {
        let last_attempt = attempt >= policy.max_retries;

        match operation().await {
            Ok(response) => {
                let status = response.status();
                if !is_retryable_status(status) || last_attempt {
                    if attempt > 0 {
                        tracing::info!("Request finished with {} after {} retries", status, attempt);
                    }
                    return Ok(response);
                }
                tracing::warn!(
                    "Retryable status {} (attempt {} of {})",
                    status,
                    attempt + 1,
                    policy.max_retries + 1
                );
            }
            Err(e) => {
                if !is_retryable_error(&e) || last_attempt {
                    return Err(WeatherError::Network(e));
                }
                tracing::warn!(
                    "Retryable error (attempt {} of {}): {}",
                    attempt + 1,
                    policy.max_retries + 1,
                    e
                );
            }
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!("Backing off for {:?}", delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
