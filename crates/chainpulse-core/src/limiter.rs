//! Per-provider client-side rate limiting.
//!
//! A token bucket sized from the provider's declared quota, plus a throttle
//! penalty window honoring upstream 429 responses. Acquisition is
//! deadline-bounded so a saturated bucket degrades into a timeout instead of
//! an unbounded wait.

use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::config::ProviderConfig;
use crate::error::FetchError;
use crate::ProviderId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DEFAULT_THROTTLE_PENALTY: Duration = Duration::from_secs(5);

/// Token-bucket limiter for one provider.
pub struct ProviderLimiter {
    provider: ProviderId,
    limiter: DirectRateLimiter,
    /// Until this instant all acquisitions wait, set on upstream 429.
    penalty_until: Mutex<Option<Instant>>,
}

impl ProviderLimiter {
    pub fn new(provider: ProviderId, quota_limit: u32, quota_window: Duration) -> Self {
        Self {
            provider,
            limiter: RateLimiter::direct(quota_from_window(quota_window, quota_limit)),
            penalty_until: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.id, config.quota_limit, config.quota_window)
    }

    /// Wait for a request slot, giving up at `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), FetchError> {
        if let Some(wait) = self.penalty_remaining() {
            let now = Instant::now();
            if now + wait > deadline {
                return Err(FetchError::DeadlineExceeded(self.provider));
            }
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        if deadline <= now {
            return Err(FetchError::DeadlineExceeded(self.provider));
        }

        match tokio::time::timeout(deadline - now, self.limiter.until_ready()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(FetchError::DeadlineExceeded(self.provider)),
        }
    }

    /// Non-blocking probe, used by tests and health reporting.
    pub fn try_acquire(&self) -> bool {
        self.penalty_remaining().is_none() && self.limiter.check().is_ok()
    }

    /// Honor an upstream 429: hold all traffic for `retry_after`, or a fixed
    /// penalty when the provider did not say.
    pub fn record_throttle(&self, retry_after: Option<Duration>) {
        let penalty = retry_after.unwrap_or(DEFAULT_THROTTLE_PENALTY);
        let until = Instant::now() + penalty;
        let mut guard = self
            .penalty_until
            .lock()
            .expect("limiter penalty lock is not poisoned");
        // Keep the later of two overlapping penalties.
        if guard.map(|existing| existing < until).unwrap_or(true) {
            *guard = Some(until);
        }
    }

    fn penalty_remaining(&self) -> Option<Duration> {
        let mut guard = self
            .penalty_until
            .lock()
            .expect("limiter penalty lock is not poisoned");
        match *guard {
            Some(until) => {
                let now = Instant::now();
                if until <= now {
                    *guard = None;
                    None
                } else {
                    Some(until - now)
                }
            }
            None => None,
        }
    }
}

/// Translate a declared `limit` requests per `window` into a governor quota:
/// one token every `window / limit`, with the full limit available as burst.
fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let limit = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let refill = window.as_secs_f64() / f64::from(limit.get());
    let period = Duration::from_secs_f64(refill.max(0.001));

    Quota::with_period(period)
        .expect("refill period is non-zero")
        .allow_burst(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_quota_then_denies() {
        let limiter = ProviderLimiter::new(ProviderId::Velo, 2, Duration::from_secs(60));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn throttle_penalty_blocks_even_with_budget() {
        let limiter = ProviderLimiter::new(ProviderId::Coingecko, 100, Duration::from_secs(60));

        assert!(limiter.try_acquire());
        limiter.record_throttle(Some(Duration::from_secs(30)));
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn expired_penalty_clears() {
        let limiter = ProviderLimiter::new(ProviderId::Coingecko, 100, Duration::from_secs(60));

        limiter.record_throttle(Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_with_deadline_exceeded_when_bucket_stays_empty() {
        let limiter = ProviderLimiter::new(ProviderId::Velo, 1, Duration::from_secs(3600));
        let deadline = Instant::now() + Duration::from_millis(50);

        limiter
            .acquire(deadline)
            .await
            .expect("first slot available");

        let denied = limiter.acquire(deadline).await;
        assert_eq!(denied, Err(FetchError::DeadlineExceeded(ProviderId::Velo)));
    }
}
