//! # Session Events
//!
//! Append-only record of everything that happened to a session, including
//! check attempts that were refused. Each event is bound to one audit entry
//! through [`SessionEvent::digest`].

use std::fmt;

use attest_audit::EventRef;
use attest_core::{
    sha256_digest, CanonicalBytes, CanonicalizationError, ContentDigest, EventId, OperationId,
    SessionId, Timestamp,
};
use attest_geo::{LocationFix, LocationFlag};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    Created,
    CheckIn,
    CheckOut,
    Ended,
    Expired,
}

impl SessionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
            Self::Ended => "ended",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the event moved the session. Rejected events are check attempts
/// whose location flag was not `granted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Accepted,
    Rejected,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: EventId,
    pub session_id: SessionId,
    pub event_type: SessionEventType,
    pub outcome: EventOutcome,
    /// Device-reported time. Informational only.
    pub client_timestamp: Option<Timestamp>,
    /// Authoritative time.
    pub server_timestamp: Timestamp,
    pub location: Option<LocationFix>,
    pub location_flag: Option<LocationFlag>,
    pub distance_meters: Option<f64>,
    pub notes: Option<String>,
    /// Set when the event came from a submitted operation.
    pub operation_id: Option<OperationId>,
}

/// Float-free projection of an event for hashing. Coordinates are fixed
/// seven-decimal strings and distances whole centimeters.
#[derive(Serialize)]
struct DigestView<'a> {
    id: &'a EventId,
    session_id: &'a SessionId,
    event_type: &'static str,
    outcome: &'static str,
    client_timestamp: Option<&'a Timestamp>,
    server_timestamp: &'a Timestamp,
    lat: Option<String>,
    lng: Option<String>,
    accuracy_cm: Option<i64>,
    location_flag: Option<&'static str>,
    distance_cm: Option<i64>,
    notes: Option<&'a str>,
    operation_id: Option<&'a OperationId>,
}

fn centimeters(meters: f64) -> i64 {
    (meters * 100.0).round() as i64
}

impl SessionEvent {
    /// SHA-256 over the canonical form of every field.
    pub fn digest(&self) -> Result<ContentDigest, CanonicalizationError> {
        let view = DigestView {
            id: &self.id,
            session_id: &self.session_id,
            event_type: self.event_type.as_str(),
            outcome: self.outcome.as_str(),
            client_timestamp: self.client_timestamp.as_ref(),
            server_timestamp: &self.server_timestamp,
            lat: self.location.map(|l| l.coordinate.lat_fixed()),
            lng: self.location.map(|l| l.coordinate.lng_fixed()),
            accuracy_cm: self.location.and_then(|l| l.accuracy_meters).map(centimeters),
            location_flag: self.location_flag.map(|f| f.as_str()),
            distance_cm: self.distance_meters.map(centimeters),
            notes: self.notes.as_deref(),
            operation_id: self.operation_id.as_ref(),
        };
        Ok(sha256_digest(&CanonicalBytes::new(&view)?))
    }

    /// The audit chain's view of this event.
    pub fn audit_ref(&self) -> Result<EventRef, CanonicalizationError> {
        Ok(EventRef {
            event_id: self.id,
            session_id: self.session_id,
            event_type: self.event_type.as_str().to_string(),
            location_flag: self.location_flag.map(|f| f.as_str().to_string()),
            event_digest: self.digest()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{IdGenerator, RandomIds};
    use attest_geo::Coordinate;

    fn check_in_event() -> SessionEvent {
        SessionEvent {
            id: RandomIds.event_id(),
            session_id: RandomIds.session_id(),
            event_type: SessionEventType::CheckIn,
            outcome: EventOutcome::Accepted,
            client_timestamp: None,
            server_timestamp: Timestamp::parse("2026-03-02T09:05:00Z").unwrap(),
            location: Some(
                LocationFix::new(Coordinate::new(37.7749, -122.4194).unwrap(), Some(12.5))
                    .unwrap(),
            ),
            location_flag: Some(LocationFlag::Granted),
            distance_meters: Some(3.21),
            notes: Some("arrived".into()),
            operation_id: None,
        }
    }

    #[test]
    fn digest_is_stable_and_float_free() {
        let e = check_in_event();
        assert_eq!(e.digest().unwrap(), e.digest().unwrap());
    }

    #[test]
    fn digest_covers_notes_and_location() {
        let e = check_in_event();
        let mut notes = e.clone();
        notes.notes = Some("arrived late".into());
        assert_ne!(e.digest().unwrap(), notes.digest().unwrap());

        let mut moved = e.clone();
        moved.location = Some(
            LocationFix::new(Coordinate::new(37.7750, -122.4194).unwrap(), Some(12.5)).unwrap(),
        );
        assert_ne!(e.digest().unwrap(), moved.digest().unwrap());
    }

    #[test]
    fn audit_ref_carries_type_and_flag() {
        let e = check_in_event();
        let r = e.audit_ref().unwrap();
        assert_eq!(r.event_type, "check_in");
        assert_eq!(r.location_flag.as_deref(), Some("granted"));
        assert_eq!(r.event_id, e.id);
        assert_eq!(r.event_digest, e.digest().unwrap());
    }
}
