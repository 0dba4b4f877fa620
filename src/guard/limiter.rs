//! Adaptive request pacing.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

/// Delay multiplier applied on each success.
const SUCCESS_FACTOR: f64 = 0.9;
/// Delay multiplier applied on each failure, before jitter.
const ERROR_FACTOR: f64 = 1.5;
/// Failure jitter range around [`ERROR_FACTOR`].
const ERROR_JITTER: (f64, f64) = (0.9, 1.1);

/// Maintains a current delay that shrinks on success and grows on failure.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    /// Upper bound of the random extra sleep added by [`RateLimiter::wait`]
    wait_jitter: Duration,
    current: Mutex<Duration>,
}

impl RateLimiter {
    /// Starts at `min_delay`.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(min_delay);
        Self {
            min_delay,
            max_delay,
            wait_jitter: Duration::from_millis(500),
            current: Mutex::new(min_delay),
        }
    }

    /// Replace the extra random sleep added on each wait.
    pub fn with_wait_jitter(mut self, jitter: Duration) -> Self {
        self.wait_jitter = jitter;
        self
    }

    pub fn current_delay(&self) -> Duration {
        *self.current.lock()
    }

    /// Shrink the delay, never below the minimum.
    pub fn record_success(&self) {
        let mut current = self.current.lock();
        *current = current.mul_f64(SUCCESS_FACTOR).max(self.min_delay);
    }

    /// Grow the delay with jitter, never above the maximum.
    pub fn record_error(&self) {
        let jitter = rand::rng().random_range(ERROR_JITTER.0..=ERROR_JITTER.1);
        let mut current = self.current.lock();
        *current = current
            .mul_f64(ERROR_FACTOR * jitter)
            .clamp(self.min_delay, self.max_delay);
    }

    /// Sleep the current delay plus a random extra up to the wait jitter.
    pub async fn wait(&self) {
        let delay = self.current_delay() + self.random_extra();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn random_extra(&self) -> Duration {
        if self.wait_jitter.is_zero() {
            return Duration::ZERO;
        }
        self.wait_jitter
            .mul_f64(rand::rng().random_range(0.0..=1.0))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(2_000))
    }
}
