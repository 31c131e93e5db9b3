//! Per-provider circuit breaker.
//!
//! Closed until either five consecutive failures or half of the last ten
//! outcomes fail, then open for a cooldown. The first caller after the
//! cooldown is admitted as a half-open probe; its outcome decides between
//! closing and re-opening.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::events::{CoreEvent, EventBus};
use crate::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Recent outcomes, `true` meaning failure. Bounded at `window_size`.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Set while one half-open probe is in flight; other callers are refused.
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window: VecDeque::new(),
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Thread-safe breaker guarding one provider's outbound calls.
pub struct CircuitBreaker {
    provider: ProviderId,
    config: BreakerConfig,
    events: EventBus,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: BreakerConfig, events: EventBus) -> Self {
        Self {
            provider,
            config,
            events,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Whether a request may go out right now.
    ///
    /// While open, returns `false` until the cooldown elapses; the first
    /// caller afterwards flips the breaker to half-open and becomes the
    /// probe. While half-open, only that single probe is admitted.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_cooldown)
                    .unwrap_or(false);
                if !cooled {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.opened_at = None;
                inner.probe_in_flight = true;
                drop(inner);
                self.events.publish(CoreEvent::CircuitHalfOpen {
                    provider: self.provider,
                });
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        let was = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        self.push_outcome(&mut inner, false);
        drop(inner);

        if was != CircuitState::Closed {
            self.events.publish(CoreEvent::CircuitClosed {
                provider: self.provider,
            });
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        self.push_outcome(&mut inner, true);

        let failed_probe = inner.state == CircuitState::HalfOpen;
        let tripped = inner.consecutive_failures >= self.config.consecutive_threshold
            || self.window_ratio_exceeded(&inner);

        if failed_probe || tripped {
            let was_open = inner.state == CircuitState::Open;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            drop(inner);

            if !was_open {
                self.events.publish(CoreEvent::CircuitOpened {
                    provider: self.provider,
                });
            }
        }
    }

    /// Release the half-open probe slot without recording an outcome.
    ///
    /// For probes that were admitted but never reached the provider (rate
    /// limiter or fetch budget cut them off): the attempt says nothing about
    /// provider health, so the next caller becomes the probe instead.
    pub fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Remaining cooldown of an open breaker, `None` when not open.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        inner
            .opened_at
            .map(|at| self.config.open_cooldown.saturating_sub(at.elapsed()))
    }

    fn push_outcome(&self, inner: &mut CircuitInner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.window_size {
            inner.window.pop_front();
        }
    }

    fn window_ratio_exceeded(&self, inner: &CircuitInner) -> bool {
        if inner.window.len() < self.config.window_size {
            return false;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        failures as f64 / inner.window.len() as f64 >= self.config.failure_ratio
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitInner> {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(config: BreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new(ProviderId::Coingecko, config, EventBus::new())
    }

    #[test]
    fn opens_on_the_exact_consecutive_threshold() {
        let breaker = breaker(BreakerConfig::default());

        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn opens_on_window_ratio_with_interleaved_successes() {
        let breaker = breaker(BreakerConfig {
            consecutive_threshold: 100,
            window_size: 10,
            failure_ratio: 0.5,
            open_cooldown: Duration::from_secs(30),
        });

        // Alternate so the consecutive counter never trips; after ten
        // outcomes the window holds 5/10 failures.
        for _ in 0..5 {
            breaker.record_failure();
            breaker.record_success();
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = breaker(BreakerConfig {
            consecutive_threshold: 1,
            window_size: 10,
            failure_ratio: 1.0,
            open_cooldown: Duration::from_millis(1),
        });

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.allow_request(), "first caller becomes the probe");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.allow_request(), "second caller must wait");

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn abandoned_probe_frees_the_slot_for_the_next_caller() {
        let breaker = breaker(BreakerConfig {
            consecutive_threshold: 1,
            window_size: 10,
            failure_ratio: 1.0,
            open_cooldown: Duration::from_millis(1),
        });

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.allow_request(), "first caller becomes the probe");
        assert!(!breaker.allow_request(), "slot is taken");

        // The probe never reached the provider; releasing the slot must not
        // count as an outcome or change the state.
        breaker.abandon_probe();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request(), "next caller becomes the probe");
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = breaker(BreakerConfig {
            consecutive_threshold: 1,
            window_size: 10,
            failure_ratio: 1.0,
            open_cooldown: Duration::from_millis(1),
        });

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[tokio::test]
    async fn emits_lifecycle_events() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let breaker = CircuitBreaker::new(
            ProviderId::Velo,
            BreakerConfig {
                consecutive_threshold: 1,
                window_size: 10,
                failure_ratio: 1.0,
                open_cooldown: Duration::from_millis(1),
            },
            events,
        );

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.allow_request());
        breaker.record_success();

        assert_eq!(
            rx.recv().await.expect("opened"),
            CoreEvent::CircuitOpened {
                provider: ProviderId::Velo
            }
        );
        assert_eq!(
            rx.recv().await.expect("half-open"),
            CoreEvent::CircuitHalfOpen {
                provider: ProviderId::Velo
            }
        );
        assert_eq!(
            rx.recv().await.expect("closed"),
            CoreEvent::CircuitClosed {
                provider: ProviderId::Velo
            }
        );
    }
}
