//! Bounded retry with exponential backoff for outbound platform calls.
//!
//! Transient failures (timeouts, rate limits) retry up to a configured
//! attempt count; every other error is terminal on the first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::error::FerryError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Backoff delay for the given 1-based attempt, doubling per attempt and
/// capped at 2^10 multiples of the base delay.
pub fn retry_delay_ms(base_delay_ms: u64, attempt: usize) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    base_delay_ms.saturating_mul(1_u64 << exponent)
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds, fails terminally, or the attempt
    /// budget is exhausted. The final transient error is returned unchanged
    /// so callers can degrade to undeliverable-event logging.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, FerryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FerryError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < attempts => {
                    let delay_ms = retry_delay_ms(self.base_delay_ms, attempt);
                    tracing::debug!(attempt, delay_ms, %error, "retrying transient failure");
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| FerryError::transient("retry budget exhausted")))
    }
}
