use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Extra slack after the advertised reset so the first call lands in the new window.
const RESET_GRACE: Duration = Duration::from_secs(1);

/// Quota state of the hosting API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitState {
    Ready,
    /// No quota left until `until`.
    Throttled { until: Instant },
}

#[derive(Debug)]
struct Inner {
    state: RateLimitState,
    remaining: Option<u32>,
    limit: Option<u32>,
}

/// Shared gate in front of every API call.
///
/// `acquire` is awaited before a request and `observe` fed with the quota
/// headers of each response.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<Inner>,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RateLimitState::Ready,
                remaining: None,
                limit: None,
            }),
            max_wait,
        }
    }

    pub async fn state(&self) -> RateLimitState {
        self.inner.lock().await.state
    }

    /// Remaining quota and window size from the last response, if reported.
    pub async fn quota(&self) -> (Option<u32>, Option<u32>) {
        let inner = self.inner.lock().await;
        (inner.remaining, inner.limit)
    }

    /// Waits until a call may be made.
    ///
    /// Returns immediately while quota is left. When throttled, sleeps until
    /// the reset instant, but never longer than the configured maximum wait.
    pub async fn acquire(&self) {
        let wait = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                RateLimitState::Throttled { until } if until > Instant::now() => {
                    until - Instant::now()
                }
                RateLimitState::Throttled { .. } => {
                    inner.state = RateLimitState::Ready;
                    return;
                }
                RateLimitState::Ready => return,
            }
        };

        let wait = wait.min(self.max_wait);
        tracing::info!(wait_secs = wait.as_secs(), "rate limit exhausted, waiting for reset");
        tokio::time::sleep(wait).await;

        let mut inner = self.inner.lock().await;
        if let RateLimitState::Throttled { until } = inner.state {
            if until <= Instant::now() {
                inner.state = RateLimitState::Ready;
            }
        }
    }

    /// Records the quota reported by a response.
    ///
    /// `reset_epoch` is the window reset as seconds since the Unix epoch.
    pub async fn observe(&self, remaining: Option<u32>, limit: Option<u32>, reset_epoch: Option<u64>) {
        let mut inner = self.inner.lock().await;
        if remaining.is_some() {
            inner.remaining = remaining;
        }
        if limit.is_some() {
            inner.limit = limit;
        }

        if remaining == Some(0) {
            let reset_in = reset_epoch.map(seconds_until).unwrap_or(Duration::from_secs(60));
            inner.state = RateLimitState::Throttled {
                until: Instant::now() + reset_in + RESET_GRACE,
            };
        } else if remaining.is_some() {
            inner.state = RateLimitState::Ready;
        }
    }

    /// Throttles for `reset_in`, e.g. after a rate-limited error response.
    pub async fn throttle(&self, reset_in: Duration) {
        let mut inner = self.inner.lock().await;
        let until = Instant::now() + reset_in;
        inner.state = match inner.state {
            RateLimitState::Throttled { until: existing } if existing > until => inner.state,
            _ => RateLimitState::Throttled { until },
        };
        inner.remaining = Some(0);
    }
}

/// Time from now until `epoch_secs`, zero if it already passed.
pub(crate) fn seconds_until(epoch_secs: u64) -> Duration {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Duration::from_secs(epoch_secs.saturating_sub(now))
}

pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_quota_left_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        limiter.observe(Some(42), Some(5000), Some(now_epoch() + 600)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.state().await, RateLimitState::Ready);
        assert_eq!(limiter.quota().await, (Some(42), Some(5000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_waits_for_reset() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        limiter.observe(Some(0), Some(5000), Some(now_epoch() + 10)).await;
        assert!(matches!(limiter.state().await, RateLimitState::Throttled { .. }));

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        // Reset is 10s away (minus the sub-second already elapsed), plus one second of grace.
        assert!(waited >= Duration::from_secs(10), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(12), "waited {:?}", waited);
        assert_eq!(limiter.state().await, RateLimitState::Ready);

        let again = Instant::now();
        limiter.acquire().await;
        assert_eq!(again.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_capped() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        limiter.observe(Some(0), None, Some(now_epoch() + 3600)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_keeps_later_deadline() {
        let limiter = RateLimiter::new(Duration::from_secs(3600));
        limiter.throttle(Duration::from_secs(30)).await;
        limiter.throttle(Duration::from_secs(5)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_seconds_until_past_is_zero() {
        assert_eq!(seconds_until(0), Duration::ZERO);
    }
}
