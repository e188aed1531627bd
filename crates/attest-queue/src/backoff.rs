use std::time::Duration;

/// Exponential backoff: `base × 2^attempts`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(300);

    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt, given the attempts made so far.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// [`delay`](Self::delay) as a chrono duration, for timestamp arithmetic.
    pub fn delay_chrono(&self, attempts: u32) -> chrono::Duration {
        let secs = i64::try_from(self.delay(attempts).as_secs()).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}
