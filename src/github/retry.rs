use super::rate_limit::RateLimiter;
use crate::error::ApiError;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff for transient API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` behind `limiter` until it succeeds, fails terminally, or
    /// attempts run out.
    ///
    /// Rate-limited failures throttle the limiter, so the next attempt
    /// waits for the quota reset instead of backing off.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            limiter.acquire().await;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            match &err {
                ApiError::RateLimited { reset_in } => {
                    tracing::warn!(attempt, reset_in_secs = reset_in.as_secs(), "rate limited, retrying after reset");
                    limiter.throttle(*reset_in).await;
                }
                _ => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient API error, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}
