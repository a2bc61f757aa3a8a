//! Retry with exponential backoff for transient fetch failures
//!
//! This is the only in-process retry in the crate and it is scoped to a single
//! file fetch inside [`HttpDownloader`](crate::downloader::HttpDownloader).
//! Whole items are never retried within a run: a failed item goes to the
//! failure queue for a later run.

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body() || e.is_request(),
            Error::Download(DownloadError::HttpStatus { status, .. }) => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            // Integrity failures come from the server's content, fetching
            // again within the same run rarely helps
            Error::Download(_) => false,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::InvalidItem { .. }
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation, retrying transient failures with exponential backoff
///
/// The operation runs once plus at most `config.max_attempts` retries. Delays
/// start at `initial_delay`, grow by `backoff_multiplier` and are capped at
/// `max_delay`; with `jitter` each sleep is stretched by up to 100%.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
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
                    tracing::info!(attempts = attempt + 1, "Fetch succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Fetch failed, retrying"
                );

                let sleep_for = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(sleep_for).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = attempt + 1, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Stretch `delay` by a uniformly random factor in `[1.0, 2.0]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
