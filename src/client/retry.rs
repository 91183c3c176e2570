//! Timeout and exponential-backoff retry for a single logical request

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::error::ApiError;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Runs one logical operation with a per-attempt timeout, retrying failures
/// that [`ApiError::is_retryable`] allows.
///
/// Attempts are strictly sequential. 4xx failures are returned on first
/// occurrence; otherwise the last error is returned once retries run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExecutor {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryExecutor {
    pub fn new(timeout: Duration, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            base_delay,
        }
    }

    /// Execute `operation`, passing it the 0-based attempt number.
    ///
    /// Exceeding the timeout drops the attempt's future, which cancels the
    /// underlying transport call.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(self.timeout)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = backoff_delay(self.base_delay, attempt);
            debug!(
                "Request failed ({}), retry {}/{} in {:?}",
                err, attempt, self.max_retries, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
