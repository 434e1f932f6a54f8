//! Reconnect pacing: capped exponential backoff with jitter, and a circuit
//! breaker that enforces a cool-down after repeated failures.
//!
//! Time is read from `tokio::time::Instant` so paused-clock tests can drive
//! both pieces deterministically.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ReconnectConfig;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Capped exponential backoff. Each call to [`Backoff::next_delay`] grows the
/// base delay by `multiplier` until `max` is reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Un-jittered delay for the current attempt.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        let exp = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exp);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Returns the delay to wait before the next attempt and advances.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max)
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are held back until the open timeout elapses.
    Open,
    /// One probe attempt is allowed; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Counts consecutive failures and opens after `failure_threshold`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: &ReconnectConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_millis(config.open_timeout_ms),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// How long the caller must wait before an attempt is allowed.
    /// Zero means go ahead. An open breaker whose timeout has elapsed moves
    /// to half-open here.
    pub fn wait_time(&self) -> Duration {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Duration::ZERO,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(self.open_timeout, |at| at.elapsed());
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!(component = %self.name, "circuit half-open, probing");
                    Duration::ZERO
                } else {
                    self.open_timeout - elapsed
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(component = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                component = %self.name,
                failures = inner.consecutive_failures,
                cool_down_ms = u64::try_from(self.open_timeout.as_millis()).unwrap_or(u64::MAX),
                "circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
            failure_threshold: 3,
            open_timeout_ms: 10_000,
        }
    }

    #[test]
    fn backoff_grows_then_caps() {
        let mut backoff = Backoff::new(&config());
        let delays: Vec<u64> = (0..6)
            .map(|_| u64::try_from(backoff.next_delay().as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(&ReconnectConfig {
            jitter: 0.5,
            ..config()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(50), "{delay:?}");
            assert!(delay <= Duration::from_millis(150), "{delay:?}");
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(&config());
        for _ in 0..10_000 {
            backoff.next_delay();
        }
        assert_eq!(backoff.base_delay(), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_after_threshold_and_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new("test", &config());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.wait_time(), Duration::ZERO);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.wait_time(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(breaker.wait_time(), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.wait_time(), Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_success_closes() {
        let breaker = CircuitBreaker::new("test", &config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.wait_time(), Duration::ZERO);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        breaker.wait_time();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    proptest::proptest! {
        #[test]
        fn jittered_delay_never_exceeds_the_cap(
            initial in 1u64..5_000,
            max in 1u64..60_000,
            multiplier in 1.0f64..4.0,
            jitter in 0.0f64..1.0,
            rounds in 1usize..40,
        ) {
            let mut backoff = Backoff::new(&ReconnectConfig {
                initial_backoff_ms: initial,
                max_backoff_ms: max,
                multiplier,
                jitter,
                ..config()
            });
            let cap = Duration::from_millis(max.max(initial));
            for _ in 0..rounds {
                proptest::prop_assert!(backoff.next_delay() <= cap);
            }
        }
    }
}
