use std::time::Duration;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_PER_OWNER: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Attempts allotted to operations that do not specify their own.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// How long a dequeued operation stays invisible before it is handed out
    /// again.
    pub lease: Duration,
    /// Live operations allowed per owner.
    pub max_per_owner: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            lease: DEFAULT_LEASE,
            max_per_owner: DEFAULT_MAX_PER_OWNER,
        }
    }
}

impl QueueConfig {
    pub(crate) fn lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lease.as_secs()).unwrap_or(i64::MAX))
    }
}
