//! Bounded exponential backoff around a fallible async operation.
//!
//! The policy knows nothing about HTTP. Callers supply the
//! retryable/non-retryable split through [`Retryable`].

use std::future::Future;
use std::time::Duration;

use crate::models::RetryConfig;

/// Classification hook for errors passed through [`RetryPolicy::execute`].
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// The last error of a failed [`RetryPolicy::execute`] call.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// `true` when the error was retryable but the retry budget ran out.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::MAX,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay to wait after the zero-indexed `attempt` fails: `base * 2^attempt`,
    /// capped at the configured maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Run `operation` up to `max_retries + 1` times.
    ///
    /// The closure receives the zero-indexed attempt number. Non-retryable
    /// errors return immediately.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt + 1,
                        exhausted: false,
                    });
                }
                Err(error) if attempt >= self.max_retries => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt + 1,
                        exhausted: true,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
