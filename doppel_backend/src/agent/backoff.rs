use std::time::Duration;

const MAX_DOUBLINGS: u32 = 4;

/// Capped exponential delay between failed poll cycles.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Record one failure and return how long to sleep before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exponent = (self.failures - 1).min(MAX_DOUBLINGS);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
