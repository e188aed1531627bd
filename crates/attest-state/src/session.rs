//! # Session Model
//!
//! A session is one attendance window for one owner at one destination.
//! Status changes go through [`Session::require_state`] and the transition
//! methods below; nothing else writes `status`.

use std::fmt;

use attest_core::{OwnerId, SessionId, Timestamp, ValidationError};
use attest_geo::Coordinate;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ─── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, waiting for a granted check-in before the deadline.
    Active,
    CheckedIn,
    /// Terminal. The only state that counts as completed attendance.
    CheckedOut,
    /// Terminal. Ended by the owner.
    Ended,
    /// Terminal. No check-in before the deadline.
    Expired,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        Self::Active,
        Self::CheckedIn,
        Self::CheckedOut,
        Self::Ended,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
            Self::Ended => "ended",
            Self::Expired => "expired",
        }
    }

    /// Counts against the one-open-session-per-owner rule.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::CheckedIn)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Notes are frozen once attendance is final or the owner has ended the
    /// session. Expired sessions still accept an explanatory note.
    pub fn notes_locked(&self) -> bool {
        matches!(self, Self::CheckedOut | Self::Ended)
    }

    /// The transition table.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        matches!(
            (self, to),
            (Self::Active, Self::CheckedIn)
                | (Self::Active, Self::Ended)
                | (Self::Active, Self::Expired)
                | (Self::CheckedIn, Self::CheckedOut)
                | (Self::CheckedIn, Self::Ended)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "session status",
                value: s.to_string(),
            })
    }
}

// ─── Destination ─────────────────────────────────────────────────────

/// Where the owner is expected to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub coordinate: Coordinate,
}

/// Operation names carried by [`SessionError::InvalidState`].
const TRANSITION_NAMES: [&str; 4] = ["check_in", "check_out", "end", "expire"];

/// The static name for a stored transition name.
pub(crate) fn transition_name(name: &str) -> Option<&'static str> {
    TRANSITION_NAMES.iter().copied().find(|t| *t == name)
}

// ─── Session ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: OwnerId,
    pub destination: Destination,
    pub status: SessionStatus,
    pub created_at: Timestamp,
    /// Time of the last status change.
    pub updated_at: Timestamp,
    /// Deadline for a granted check-in.
    pub expires_at: Timestamp,
    pub checked_in_at: Option<Timestamp>,
    pub checked_out_at: Option<Timestamp>,
    #[serde(default)]
    pub notes: String,
    pub is_complete: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        owner: OwnerId,
        destination: Destination,
        notes: String,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            id,
            owner,
            destination,
            status: SessionStatus::Active,
            created_at,
            updated_at: created_at,
            expires_at,
            checked_in_at: None,
            checked_out_at: None,
            notes,
            is_complete: false,
        }
    }

    /// The check-in deadline has passed. Only meaningful while `active`.
    pub fn is_past_deadline(&self, now: Timestamp) -> bool {
        self.status == SessionStatus::Active && now >= self.expires_at
    }

    /// Minutes between check-in and check-out, for completed sessions.
    pub fn duration_minutes(&self) -> Option<f64> {
        match (self.status, self.checked_in_at, self.checked_out_at) {
            (SessionStatus::CheckedOut, Some(start), Some(end)) => {
                Some(end.since(&start).num_seconds() as f64 / 60.0)
            }
            _ => None,
        }
    }

    pub fn check_in(&mut self, at: Timestamp) -> Result<(), SessionError> {
        self.require_state(&[SessionStatus::Active], "check_in")?;
        self.checked_in_at = Some(at);
        self.do_transition(SessionStatus::CheckedIn, at);
        Ok(())
    }

    pub fn check_out(&mut self, at: Timestamp) -> Result<(), SessionError> {
        self.require_state(&[SessionStatus::CheckedIn], "check_out")?;
        self.checked_out_at = Some(at);
        self.is_complete = true;
        self.do_transition(SessionStatus::CheckedOut, at);
        Ok(())
    }

    pub fn end(&mut self, reason: &str, at: Timestamp) -> Result<(), SessionError> {
        self.require_state(&[SessionStatus::Active, SessionStatus::CheckedIn], "end")?;
        let line = format!("Ended: {reason}");
        self.notes = if self.notes.is_empty() {
            line
        } else {
            format!("{}\n{line}", self.notes)
        };
        self.do_transition(SessionStatus::Ended, at);
        Ok(())
    }

    pub fn expire(&mut self, at: Timestamp) -> Result<(), SessionError> {
        self.require_state(&[SessionStatus::Active], "expire")?;
        self.do_transition(SessionStatus::Expired, at);
        Ok(())
    }

    pub fn set_notes(&mut self, notes: String) -> Result<(), SessionError> {
        if self.status.notes_locked() {
            return Err(SessionError::NotesLocked {
                session_id: self.id,
                status: self.status,
            });
        }
        self.notes = notes;
        Ok(())
    }

    /// Validate that the session is in one of the expected states.
    pub fn require_state(
        &self,
        expected: &[SessionStatus],
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if expected.contains(&self.status) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                session_id: self.id,
                status: self.status,
                operation,
            })
        }
    }

    fn do_transition(&mut self, to: SessionStatus, at: Timestamp) {
        debug_assert!(self.status.can_transition_to(to));
        self.status = to;
        self.updated_at = at;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{IdGenerator, RandomIds};
    use chrono::Duration;

    fn t0() -> Timestamp {
        Timestamp::parse("2026-03-02T09:00:00Z").unwrap()
    }

    fn make_session() -> Session {
        Session::new(
            RandomIds.session_id(),
            OwnerId::new("owner-1").unwrap(),
            Destination {
                name: "Head office".into(),
                address: None,
                coordinate: Coordinate::new(37.7749, -122.4194).unwrap(),
            },
            String::new(),
            t0(),
            t0().saturating_add(Duration::minutes(15)),
        )
    }

    #[test]
    fn test_new_session_is_active() {
        let s = make_session();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(!s.is_complete);
        assert_eq!(s.updated_at, s.created_at);
    }

    #[test]
    fn test_full_lifecycle() {
        let mut s = make_session();
        let t1 = t0().saturating_add(Duration::minutes(5));
        let t2 = t0().saturating_add(Duration::minutes(95));
        s.check_in(t1).unwrap();
        assert_eq!(s.status, SessionStatus::CheckedIn);
        assert_eq!(s.checked_in_at, Some(t1));
        s.check_out(t2).unwrap();
        assert_eq!(s.status, SessionStatus::CheckedOut);
        assert!(s.is_complete);
        assert_eq!(s.updated_at, t2);
        assert_eq!(s.duration_minutes(), Some(90.0));
    }

    #[test]
    fn test_cannot_check_out_from_active() {
        let mut s = make_session();
        let err = s.check_out(t0()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                status: SessionStatus::Active,
                operation: "check_out",
                ..
            }
        ));
    }

    #[test]
    fn test_checked_in_cannot_expire() {
        let mut s = make_session();
        s.check_in(t0()).unwrap();
        assert!(s.expire(t0()).is_err());
        assert!(!s.is_past_deadline(t0().saturating_add(Duration::hours(5))));
    }

    #[test]
    fn test_end_appends_reason_to_notes() {
        let mut s = make_session();
        s.set_notes("running late".into()).unwrap();
        s.end("traffic", t0()).unwrap();
        assert_eq!(s.notes, "running late\nEnded: traffic");
        assert_eq!(s.status, SessionStatus::Ended);
    }

    #[test]
    fn test_notes_locked_after_check_out_and_end() {
        let mut s = make_session();
        s.check_in(t0()).unwrap();
        s.set_notes("in".into()).unwrap();
        s.check_out(t0()).unwrap();
        assert!(matches!(
            s.set_notes("x".into()),
            Err(SessionError::NotesLocked { .. })
        ));

        let mut e = make_session();
        e.end("done", t0()).unwrap();
        assert!(e.set_notes("x".into()).is_err());

        let mut x = make_session();
        x.expire(t0()).unwrap();
        assert!(x.set_notes("phone died".into()).is_ok());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        for from in SessionStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in SessionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in SessionStatus::ALL {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("archived".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let s = make_session();
        assert!(!s.is_past_deadline(t0().saturating_add(Duration::minutes(14))));
        assert!(s.is_past_deadline(s.expires_at));
    }
}
