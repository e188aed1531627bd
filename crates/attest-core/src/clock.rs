//! # Clock and Identifier Sources
//!
//! Time and identity are injected. Components hold an `Arc<dyn Clock>` and an
//! `Arc<dyn IdGenerator>`; production wires [`SystemClock`] and
//! [`RandomIds`], tests wire [`ManualClock`].

use chrono::Duration;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::identity::{EventId, SessionId};
use crate::temporal::Timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time that never moves backwards.
///
/// A step back in the system clock (NTP correction) would otherwise let an
/// audit entry carry an earlier timestamp than its predecessor, or make a
/// queue row eligible before the row dequeued ahead of it.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<Timestamp>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::now();
        let mut last = self.last.lock();
        let now = match *last {
            Some(prev) if prev > wall => prev,
            _ => wall,
        };
        *last = Some(now);
        now
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock();
        *now = now.saturating_add(d);
    }

    /// Jump to `t`. Callers are trusted not to go backwards.
    pub fn set(&self, t: Timestamp) {
        *self.now.lock() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Source of fresh server-assigned identifiers.
pub trait IdGenerator: Send + Sync {
    fn session_id(&self) -> SessionId;
    fn event_id(&self) -> EventId;
}

/// UUIDv4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn session_id(&self) -> SessionId {
        SessionId::from_uuid(Uuid::new_v4())
    }

    fn event_id(&self) -> EventId {
        EventId::from_uuid(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let future = Timestamp::now().saturating_add(Duration::hours(1));
        *clock.last.lock() = Some(future);
        assert_eq!(clock.now(), future);
    }

    #[test]
    fn manual_clock_advances() {
        let start = Timestamp::parse("2026-03-01T08:00:00Z").unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(16));
        assert_eq!(clock.now().to_iso8601(), "2026-03-01T08:16:00Z");
    }

    #[test]
    fn random_ids_are_distinct() {
        let ids = RandomIds;
        assert_ne!(ids.session_id(), ids.session_id());
        assert_ne!(ids.event_id(), ids.event_id());
    }
}
