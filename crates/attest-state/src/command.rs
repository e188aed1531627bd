//! Decoding of operation payloads and request bodies into engine inputs.
//!
//! Field names follow what devices already send: `latitude`, `longitude`,
//! `accuracy`, `timestamp` (RFC 3339 or epoch seconds), `notes`. Extra
//! telemetry such as altitude or heading is ignored.

use std::future::Future;
use std::time::Duration;

use attest_core::{OwnerId, Payload, Timestamp};
use attest_geo::{acquire_sample, Coordinate, LocationFix, LocationSample};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::SessionError;
use crate::session::Destination;

/// Reason recorded when an end request does not give one.
pub const DEFAULT_END_REASON: &str = "Manual end";

/// A check-in or check-out attempt as the engine consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    pub sample: LocationSample,
    pub client_timestamp: Option<Timestamp>,
    pub notes: Option<String>,
}

impl LocationReport {
    pub fn fix(fix: LocationFix) -> Self {
        Self {
            sample: LocationSample::Fix(fix),
            client_timestamp: None,
            notes: None,
        }
    }

    pub fn without_fix(sample: LocationSample) -> Self {
        Self {
            sample,
            client_timestamp: None,
            notes: None,
        }
    }

    /// Build a report from a device position source, waiting at most
    /// `timeout`. A source that does not answer in time yields a report the
    /// verifier flags `timeout`.
    pub async fn acquire<F>(source: F, timeout: Duration) -> Self
    where
        F: Future<Output = LocationSample>,
    {
        Self::without_fix(acquire_sample(source, timeout).await)
    }
}

/// Wire form of a location report.
///
/// `location_status` is `timeout` when the device gave up waiting for a fix
/// and `unavailable` when location services are off. Otherwise
/// `latitude`/`longitude` are required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationReportInput {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub location_status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LocationReportInput {
    pub fn into_report(self) -> Result<LocationReport, SessionError> {
        let sample = match self.location_status.as_deref() {
            Some("timeout") => LocationSample::Absent,
            Some("unavailable") | Some("disabled") => LocationSample::ServicesDisabled,
            None | Some("available") => match (self.latitude, self.longitude) {
                (Some(lat), Some(lng)) => {
                    LocationSample::Fix(LocationFix::new(Coordinate::new(lat, lng)?, self.accuracy)?)
                }
                _ => {
                    return Err(SessionError::Validation(
                        "latitude and longitude are required".into(),
                    ))
                }
            },
            Some(other) => {
                return Err(SessionError::Validation(format!(
                    "unknown location_status {other:?}"
                )))
            }
        };
        Ok(LocationReport {
            sample,
            client_timestamp: self.timestamp.map(client_timestamp).transpose()?.flatten(),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

fn client_timestamp(value: Value) -> Result<Option<Timestamp>, SessionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(Timestamp::parse_client(&s)?)),
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .ok_or_else(|| SessionError::Validation(format!("invalid timestamp {n}")))?;
            Ok(Some(Timestamp::from_epoch_secs(secs)?))
        }
        other => Err(SessionError::Validation(format!(
            "timestamp must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationInput {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl DestinationInput {
    pub fn into_destination(self) -> Result<Destination, SessionError> {
        if self.name.trim().is_empty() {
            return Err(SessionError::Validation("destination name is empty".into()));
        }
        Ok(Destination {
            name: self.name,
            address: self.address.filter(|a| !a.trim().is_empty()),
            coordinate: Coordinate::new(self.latitude, self.longitude)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionInput {
    pub owner_id: OwnerId,
    pub destination: DestinationInput,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndSessionInput {
    #[serde(default)]
    pub reason: Option<String>,
}

impl EndSessionInput {
    pub fn reason(&self) -> &str {
        match self.reason.as_deref() {
            Some(r) if !r.trim().is_empty() => r.trim(),
            _ => DEFAULT_END_REASON,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateNotesInput {
    pub notes: String,
}

/// Decode an operation payload into a typed input.
pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, SessionError> {
    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| SessionError::Validation(format!("invalid payload: {e}")))
}
