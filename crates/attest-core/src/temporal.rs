//! # Temporal Types: UTC-Only Timestamps
//!
//! `Timestamp` is UTC, truncated to whole seconds and rendered as
//! `YYYY-MM-DDTHH:MM:SSZ`. Audit entries, queue rows and session events all
//! store this rendering, so a value read back from SQLite hashes to the same
//! bytes it was hashed from. The fixed-width rendering also sorts
//! lexicographically in time order, which the queue relies on for indexed
//! range predicates.

use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time, truncated. Prefer an injected
    /// [`Clock`](crate::Clock) in component code.
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    /// Create a timestamp from a `DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse a strict RFC 3339 string with a `Z` suffix.
    ///
    /// Offsets such as `+00:00` are rejected: this is the storage format and
    /// there is exactly one accepted spelling of each instant.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !s.ends_with('Z') {
            return Err(ValidationError::InvalidTimestamp(format!(
                "must use Z suffix (UTC only), got {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ValidationError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        Ok(Self::from_utc(dt.with_timezone(&Utc)))
    }

    /// Parse a client-reported time: any RFC 3339 offset, or Unix epoch
    /// seconds (integer or fractional) as devices commonly report.
    pub fn parse_client(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from_utc(dt.with_timezone(&Utc)));
        }
        match trimmed.parse::<f64>() {
            Ok(secs) if secs.is_finite() => Self::from_epoch_secs(secs.trunc() as i64),
            _ => Err(ValidationError::InvalidTimestamp(format!(
                "expected RFC 3339 or epoch seconds, got {s:?}"
            ))),
        }
    }

    /// Create a timestamp from Unix epoch seconds.
    pub fn from_epoch_secs(secs: i64) -> Result<Self, ValidationError> {
        DateTime::from_timestamp(secs, 0)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTimestamp(format!("epoch {secs} out of range")))
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Add a duration, saturating at the representable maximum.
    pub fn saturating_add(&self, d: Duration) -> Self {
        self.0
            .checked_add_signed(d)
            .map(Self::from_utc)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Signed duration from `earlier` to `self`.
    pub fn since(&self, earlier: &Timestamp) -> Duration {
        self.0.signed_duration_since(earlier.0)
    }

    /// Render as ISO 8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn from_utc_truncates() {
        let dt = Utc
            .with_ymd_and_hms(2026, 1, 15, 12, 30, 45)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let ts = Timestamp::from_utc(dt);
        assert_eq!(ts.as_datetime().nanosecond(), 0);
        assert_eq!(ts.to_iso8601(), "2026-01-15T12:30:45Z");
    }

    #[test]
    fn strict_parse_accepts_only_z() {
        assert!(Timestamp::parse("2026-01-15T12:00:00Z").is_ok());
        assert!(Timestamp::parse("2026-01-15T12:00:00+00:00").is_err());
        assert!(Timestamp::parse("2026-01-15T08:00:00-04:00").is_err());
        assert!(Timestamp::parse("not-a-date").is_err());
    }

    #[test]
    fn client_parse_accepts_offsets_and_epoch() {
        let a = Timestamp::parse_client("2026-01-15T17:00:00+05:00").unwrap();
        assert_eq!(a.to_iso8601(), "2026-01-15T12:00:00Z");

        let b = Timestamp::parse_client("1768478400").unwrap();
        assert_eq!(b.to_iso8601(), "2026-01-15T12:00:00Z");

        let c = Timestamp::parse_client("1768478400.75").unwrap();
        assert_eq!(c, b);

        assert!(Timestamp::parse_client("yesterday").is_err());
    }

    #[test]
    fn saturating_add_and_since() {
        let start = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        let later = start.saturating_add(Duration::minutes(15));
        assert_eq!(later.to_iso8601(), "2026-01-15T12:15:00Z");
        assert_eq!(later.since(&start), Duration::minutes(15));
    }

    #[test]
    fn iso_rendering_sorts_like_time() {
        let earlier = Timestamp::parse("2026-01-15T09:59:59Z").unwrap();
        let later = Timestamp::parse("2026-01-15T10:00:00Z").unwrap();
        assert!(earlier < later);
        assert!(earlier.to_iso8601() < later.to_iso8601());
    }

    #[test]
    fn serde_round_trip() {
        let ts = Timestamp::parse("2026-06-30T23:59:59Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2026-06-30T23:59:59Z\"");
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }
}
