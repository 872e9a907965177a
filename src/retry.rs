//! Retry logic with exponential backoff
//!
//! Two retry mechanisms live here:
//!
//! - [`with_retry`] wraps an in-process async operation (feed calls) with
//!   bounded, jittered exponential backoff. Transient failures are retried
//!   up to the configured attempt count; permanent failures surface
//!   immediately.
//! - [`backoff_delay`] / [`retry_score`] implement the queue-level retry
//!   schedule: a failed task is re-enqueued with a future score so it only
//!   becomes eligible again after `min(60 * 2^retry_count, 3600)` seconds.

use crate::config::RetryConfig;
use crate::error::{Error, FeedError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Maximum queue-level retry delay in seconds (one hour)
pub const MAX_BACKOFF_SECS: u64 = 3600;

/// Base queue-level retry delay in seconds
pub const BASE_BACKOFF_SECS: u64 = 60;

/// Delay before the nth retry of a queued task
///
/// `60 * 2^retry_count`, capped at one hour. The exponent saturates so large
/// retry counts cannot overflow.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count.min(16));
    Duration::from_secs(
        BASE_BACKOFF_SECS
            .saturating_mul(factor)
            .min(MAX_BACKOFF_SECS),
    )
}

/// Sorted-set score for a retried task: eligible `backoff_delay` from `now`
///
/// `now` is Unix seconds as a float, matching the substrate's score domain.
pub fn retry_score(now: f64, retry_count: u32) -> f64 {
    now + backoff_delay(retry_count).as_secs_f64()
}

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, 5xx) should return `true`.
/// Permanent failures (parse errors, invalid input) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors: retry timeouts and connection failures
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // Feed service: retry the status codes the upstream contract names
            Error::Feed(FeedError::Status { status }) => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            Error::Feed(FeedError::Unavailable(_)) => true,
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Everything else is handled by the queue-level discipline
            _ => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay falls between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
