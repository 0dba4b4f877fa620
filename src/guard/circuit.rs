//! Three-state circuit breaker.
//!
//! `Closed` → `Open` once cumulative failures reach the threshold. While
//! open, [`CircuitBreaker::check`] refuses until the cooldown since the last
//! failure has elapsed, then moves to `HalfOpen`. A success in `HalfOpen`
//! closes the circuit and resets the count; a failure re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Returned by [`CircuitBreaker::check`] while the circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit open, retry in {}s", remaining.as_secs())]
pub struct CircuitOpen {
    pub remaining: Duration,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(now);

        if inner.state == CircuitState::HalfOpen || inner.failure_count >= self.threshold {
            if inner.state != CircuitState::Open {
                tracing::warn!(
                    target: "guard",
                    failures = inner.failure_count,
                    cooldown_secs = self.cooldown.as_secs(),
                    "circuit opened"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Close a half-open circuit. Failures in a closed circuit stay counted.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            tracing::info!(target: "guard", "circuit closed");
        }
    }

    /// Whether work may proceed now.
    pub fn check(&self) -> Result<(), CircuitOpen> {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(self.cooldown);

        if elapsed > self.cooldown {
            inner.state = CircuitState::HalfOpen;
            tracing::info!(target: "guard", "circuit half-open");
            Ok(())
        } else {
            Err(CircuitOpen {
                remaining: self.cooldown - elapsed,
            })
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn tripped(t0: Instant) -> CircuitBreaker {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        breaker
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_opens_at_threshold() {
        let t0 = Instant::now();
        let breaker = tripped(t0);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[test]
    fn test_check_before_cooldown_refuses() {
        let t0 = Instant::now();
        let breaker = tripped(t0);

        let err = breaker.check_at(t0 + Duration::from_secs(100)).unwrap_err();
        assert_eq!(err.remaining, Duration::from_secs(200));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_then_success_closes() {
        let t0 = Instant::now();
        let breaker = tripped(t0);

        assert!(breaker.check_at(t0 + COOLDOWN + Duration::from_secs(1)).is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_failure_in_half_open_reopens() {
        let t0 = Instant::now();
        let breaker = tripped(t0);
        let later = t0 + COOLDOWN + Duration::from_secs(1);
        breaker.check_at(later).unwrap();

        breaker.record_failure_at(later);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check_at(later + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_success_while_closed_keeps_count() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
