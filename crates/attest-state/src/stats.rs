use std::collections::BTreeMap;

use attest_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionStatus};

/// Inclusive creation-time window. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRange {
    #[serde(default)]
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
}

impl StatsRange {
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t <= e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatistics {
    pub total_sessions: u64,
    /// Every status appears, zero included.
    pub status_breakdown: BTreeMap<String, u64>,
    pub completed_sessions: u64,
    /// Mean check-in to check-out time of completed sessions, two decimals.
    pub average_duration_minutes: f64,
    pub range: StatsRange,
}

impl SessionStatistics {
    pub fn compute<'a>(sessions: impl IntoIterator<Item = &'a Session>, range: StatsRange) -> Self {
        let mut breakdown: BTreeMap<String, u64> = SessionStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut total = 0u64;
        let mut durations = Vec::new();
        for session in sessions.into_iter().filter(|s| range.contains(s.created_at)) {
            total += 1;
            *breakdown.entry(session.status.as_str().to_string()).or_default() += 1;
            if let Some(minutes) = session.duration_minutes() {
                durations.push(minutes);
            }
        }
        let average = if durations.is_empty() {
            0.0
        } else {
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            (mean * 100.0).round() / 100.0
        };
        Self {
            total_sessions: total,
            status_breakdown: breakdown,
            completed_sessions: durations.len() as u64,
            average_duration_minutes: average,
            range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Destination;
    use attest_core::{IdGenerator, OwnerId, RandomIds};
    use attest_geo::Coordinate;
    use chrono::Duration;

    fn at(mins: i64) -> Timestamp {
        Timestamp::parse("2026-03-02T09:00:00Z")
            .unwrap()
            .saturating_add(Duration::minutes(mins))
    }

    fn session(created: i64) -> Session {
        Session::new(
            RandomIds.session_id(),
            OwnerId::new("o").unwrap(),
            Destination {
                name: "HQ".into(),
                address: None,
                coordinate: Coordinate::new(0.0, 0.0).unwrap(),
            },
            String::new(),
            at(created),
            at(created + 15),
        )
    }

    fn completed(created: i64, minutes: i64) -> Session {
        let mut s = session(created);
        s.check_in(at(created + 1)).unwrap();
        s.check_out(at(created + 1 + minutes)).unwrap();
        s
    }

    #[test]
    fn empty_statistics() {
        let stats = SessionStatistics::compute(std::iter::empty(), StatsRange::default());
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.completed_sessions, 0);
        assert_eq!(stats.average_duration_minutes, 0.0);
        assert_eq!(stats.status_breakdown.len(), 5);
    }

    #[test]
    fn average_over_completed_only() {
        let mut ended = session(0);
        ended.end("x", at(3)).unwrap();
        let sessions = vec![completed(0, 30), completed(100, 45), session(200), ended];
        let stats = SessionStatistics::compute(&sessions, StatsRange::default());
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.completed_sessions, 2);
        assert_eq!(stats.average_duration_minutes, 37.5);
        assert_eq!(stats.status_breakdown["checked_out"], 2);
        assert_eq!(stats.status_breakdown["active"], 1);
        assert_eq!(stats.status_breakdown["ended"], 1);
        assert_eq!(stats.status_breakdown["expired"], 0);
    }

    #[test]
    fn average_rounds_to_two_decimals() {
        let mut a = session(0);
        a.check_in(at(0)).unwrap();
        a.check_out(at(0).saturating_add(Duration::seconds(100))).unwrap();
        let stats = SessionStatistics::compute([&a], StatsRange::default());
        assert_eq!(stats.average_duration_minutes, 1.67);
    }

    #[test]
    fn range_is_inclusive_on_creation_time() {
        let sessions = vec![session(0), session(60), session(120)];
        let range = StatsRange {
            start: Some(at(60)),
            end: Some(at(120)),
        };
        assert_eq!(SessionStatistics::compute(&sessions, range).total_sessions, 2);
    }
}
