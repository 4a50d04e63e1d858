//! Bounded exponential back-off for automatic reconnection.

use std::time::Duration;

/// Retry bookkeeping for one client instance.
///
/// The delay starts at `base`, doubles after every failed attempt and never
/// exceeds `max`. A successful `Ready` transition calls [`RetryState::reset`].
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    delay: Duration,
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl RetryState {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            delay: base.min(max),
            base,
            max,
            max_attempts,
        }
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.delay = self.delay.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.base.min(self.max);
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}
