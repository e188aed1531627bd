use attest_geo::VerifierConfig;
use chrono::Duration;

/// Minutes a new session may stay `active` before the sweep expires it.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub verifier: VerifierConfig,
    pub expiry_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verifier: VerifierConfig::default(),
            expiry_window: Duration::minutes(DEFAULT_EXPIRY_MINUTES),
        }
    }
}
