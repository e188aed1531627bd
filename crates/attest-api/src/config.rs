//! # Service Configuration
//!
//! Read once from the environment at startup. Every value has a default
//! except the webhook secret, which is required when a webhook URL is set.
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `8080` |
//! | `ATTEST_DATABASE_URL` | `sqlite://attest.db?mode=rwc` |
//! | `ATTEST_GPS_THRESHOLD_METERS` | `200` |
//! | `ATTEST_SESSION_EXPIRY_MINUTES` | `15` |
//! | `ATTEST_SYNC_INTERVAL_SECS` | `5` |
//! | `ATTEST_SWEEP_INTERVAL_SECS` | `5` |
//! | `ATTEST_WEBHOOK_INTERVAL_SECS` | `2` |
//! | `ATTEST_WEBHOOK_CONCURRENCY` | `4` |
//! | `ATTEST_SYNC_BATCH_SIZE` | `50` |
//! | `ATTEST_QUEUE_MAX_ATTEMPTS` | `3` |
//! | `ATTEST_QUEUE_BASE_DELAY_SECS` | `5` |
//! | `ATTEST_QUEUE_MAX_DELAY_SECS` | `300` |
//! | `ATTEST_QUEUE_LEASE_SECS` | `60` |
//! | `ATTEST_QUEUE_MAX_PER_OWNER` | `1000` |
//! | `ATTEST_WEBHOOK_URL` / `ATTEST_WEBHOOK_SECRET` | unset |
//! | `ATTEST_SYNC_REMOTE_URL` | unset (submit in-process) |
//! | `ATTEST_LOG_FORMAT` | `text` (`json` for JSON lines) |

use std::str::FromStr;
use std::time::Duration;

use attest_crypto::SigningSecret;
use attest_geo::VerifierConfig;
use attest_queue::{BackoffPolicy, QueueConfig};
use attest_state::EngineConfig;
use attest_sync::{SchedulerConfig, WebhookConfig, DEFAULT_BATCH_SIZE};
use url::Url;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://attest.db?mode=rwc";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("ATTEST_WEBHOOK_SECRET is required when ATTEST_WEBHOOK_URL is set")]
    MissingWebhookSecret,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub engine: EngineConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub sync_batch_size: usize,
    pub sync_remote_url: Option<Url>,
    pub webhook: Option<WebhookConfig>,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            engine: EngineConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            sync_batch_size: DEFAULT_BATCH_SIZE,
            sync_remote_url: None,
            webhook: None,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// or `None` when unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let threshold: f64 = env.parse_or("ATTEST_GPS_THRESHOLD_METERS", 200.0)?;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(
                "ATTEST_GPS_THRESHOLD_METERS",
                threshold.to_string(),
                "must be a positive number of meters",
            ));
        }
        let expiry_minutes: i64 = env.parse_or("ATTEST_SESSION_EXPIRY_MINUTES", 15)?;
        if expiry_minutes <= 0 {
            return Err(invalid(
                "ATTEST_SESSION_EXPIRY_MINUTES",
                expiry_minutes.to_string(),
                "must be positive",
            ));
        }

        let backoff = BackoffPolicy::new(
            env.secs_or("ATTEST_QUEUE_BASE_DELAY_SECS", BackoffPolicy::DEFAULT_BASE)?,
            env.secs_or("ATTEST_QUEUE_MAX_DELAY_SECS", BackoffPolicy::DEFAULT_MAX)?,
        );
        let queue = QueueConfig {
            max_attempts: env.positive_or("ATTEST_QUEUE_MAX_ATTEMPTS", defaults.queue.max_attempts)?,
            backoff,
            lease: env.secs_or("ATTEST_QUEUE_LEASE_SECS", defaults.queue.lease)?,
            max_per_owner: env
                .positive_or("ATTEST_QUEUE_MAX_PER_OWNER", defaults.queue.max_per_owner)?,
        };

        let webhook = match env.get("ATTEST_WEBHOOK_URL") {
            None => None,
            Some(raw) => {
                let url = env.url("ATTEST_WEBHOOK_URL", &raw)?;
                let secret = env
                    .get("ATTEST_WEBHOOK_SECRET")
                    .ok_or(ConfigError::MissingWebhookSecret)?;
                let secret = SigningSecret::new(secret).map_err(|e| {
                    invalid("ATTEST_WEBHOOK_SECRET", "[REDACTED]".into(), &e.to_string())
                })?;
                Some(WebhookConfig {
                    max_attempts: queue.max_attempts,
                    backoff,
                    lease: queue.lease,
                    concurrency: env.positive_or(
                        "ATTEST_WEBHOOK_CONCURRENCY",
                        WebhookConfig::DEFAULT_CONCURRENCY,
                    )?,
                    ..WebhookConfig::new(url, secret)
                })
            }
        };

        let sync_remote_url = env
            .get("ATTEST_SYNC_REMOTE_URL")
            .map(|raw| env.url("ATTEST_SYNC_REMOTE_URL", &raw))
            .transpose()?;

        Ok(Self {
            port: env.parse_or("PORT", DEFAULT_PORT)?,
            database_url: env
                .get("ATTEST_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            engine: EngineConfig {
                verifier: VerifierConfig {
                    threshold_meters: threshold,
                },
                expiry_window: chrono::Duration::minutes(expiry_minutes),
            },
            queue,
            scheduler: SchedulerConfig {
                sync_interval: env.secs_or(
                    "ATTEST_SYNC_INTERVAL_SECS",
                    SchedulerConfig::DEFAULT_SYNC_INTERVAL,
                )?,
                sweep_interval: env.secs_or(
                    "ATTEST_SWEEP_INTERVAL_SECS",
                    SchedulerConfig::DEFAULT_SWEEP_INTERVAL,
                )?,
                delivery_interval: env.secs_or(
                    "ATTEST_WEBHOOK_INTERVAL_SECS",
                    SchedulerConfig::DEFAULT_DELIVERY_INTERVAL,
                )?,
            },
            sync_batch_size: env.positive_or("ATTEST_SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            sync_remote_url,
            webhook,
            log_json: env
                .get("ATTEST_LOG_FORMAT")
                .is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }
}

fn invalid(var: &'static str, value: String, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.to_string(),
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Unset and blank values are treated alike.
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(var, raw.clone(), &e.to_string())),
        }
    }

    fn positive_or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value = self.parse_or(var, default)?;
        if value <= T::default() {
            return Err(invalid(var, value.to_string(), "must be positive"));
        }
        Ok(value)
    }

    fn secs_or(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(
            self.positive_or(var, default.as_secs())?,
        ))
    }

    fn url(&self, var: &'static str, raw: &str) -> Result<Url, ConfigError> {
        Url::parse(raw).map_err(|e| invalid(var, raw.to_string(), &e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "sqlite://attest.db?mode=rwc");
        assert_eq!(cfg.engine.verifier.threshold_meters, 200.0);
        assert_eq!(cfg.engine.expiry_window, chrono::Duration::minutes(15));
        assert_eq!(cfg.queue, QueueConfig::default());
        assert_eq!(cfg.scheduler, SchedulerConfig::default());
        assert_eq!(cfg.sync_batch_size, 50);
        assert!(cfg.webhook.is_none());
        assert!(cfg.sync_remote_url.is_none());
        assert!(!cfg.log_json);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("PORT", "9090"),
            ("ATTEST_GPS_THRESHOLD_METERS", "150.5"),
            ("ATTEST_SESSION_EXPIRY_MINUTES", "30"),
            ("ATTEST_QUEUE_MAX_ATTEMPTS", "5"),
            ("ATTEST_QUEUE_BASE_DELAY_SECS", "2"),
            ("ATTEST_QUEUE_LEASE_SECS", "120"),
            ("ATTEST_SYNC_INTERVAL_SECS", "1"),
            ("ATTEST_LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.engine.verifier.threshold_meters, 150.5);
        assert_eq!(cfg.engine.expiry_window, chrono::Duration::minutes(30));
        assert_eq!(cfg.queue.max_attempts, 5);
        assert_eq!(cfg.queue.backoff.base, Duration::from_secs(2));
        assert_eq!(cfg.queue.backoff.max, Duration::from_secs(300));
        assert_eq!(cfg.queue.lease, Duration::from_secs(120));
        assert_eq!(cfg.scheduler.sync_interval, Duration::from_secs(1));
        assert!(cfg.log_json);
    }

    #[test]
    fn webhook_requires_secret() {
        assert!(matches!(
            load(&[("ATTEST_WEBHOOK_URL", "https://crm.example/hooks")]),
            Err(ConfigError::MissingWebhookSecret)
        ));
        let cfg = load(&[
            ("ATTEST_WEBHOOK_URL", "https://crm.example/hooks"),
            ("ATTEST_WEBHOOK_SECRET", "s3cret"),
            ("ATTEST_QUEUE_MAX_ATTEMPTS", "4"),
            ("ATTEST_WEBHOOK_CONCURRENCY", "8"),
            ("ATTEST_WEBHOOK_INTERVAL_SECS", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.scheduler.delivery_interval, Duration::from_secs(1));
        let webhook = cfg.webhook.unwrap();
        assert_eq!(webhook.url.as_str(), "https://crm.example/hooks");
        assert_eq!(webhook.max_attempts, 4);
        assert_eq!(webhook.concurrency, 8);
        assert_eq!(webhook.outbox().lease, Duration::from_secs(60));
        assert!(!format!("{webhook:?}").contains("s3cret"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (var, value) in [
            ("PORT", "eighty"),
            ("ATTEST_GPS_THRESHOLD_METERS", "0"),
            ("ATTEST_GPS_THRESHOLD_METERS", "NaN"),
            ("ATTEST_SESSION_EXPIRY_MINUTES", "-1"),
            ("ATTEST_QUEUE_MAX_ATTEMPTS", "0"),
            ("ATTEST_SYNC_REMOTE_URL", "not a url"),
        ] {
            match load(&[(var, value)]) {
                Err(ConfigError::Invalid { var: v, .. }) => assert_eq!(v, var),
                other => panic!("{var}={value}: expected Invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("PORT", "  "), ("ATTEST_WEBHOOK_URL", "")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.webhook.is_none());
    }
}
