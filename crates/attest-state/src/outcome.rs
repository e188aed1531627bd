use attest_core::{OperationId, SessionId};
use attest_geo::LocationFlag;
use serde::{Deserialize, Serialize};

use crate::event::SessionEvent;
use crate::session::Session;

/// Result of a check-in or check-out attempt. Both arms record an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Accepted {
        session: Session,
        event: SessionEvent,
    },
    /// The location was not verified. The session is unchanged.
    Rejected {
        session: Session,
        event: SessionEvent,
        flag: LocationFlag,
        distance_meters: Option<f64>,
    },
}

impl CheckOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn session(&self) -> &Session {
        match self {
            Self::Accepted { session, .. } | Self::Rejected { session, .. } => session,
        }
    }

    pub fn event(&self) -> &SessionEvent {
        match self {
            Self::Accepted { event, .. } | Self::Rejected { event, .. } => event,
        }
    }
}

/// What an applied operation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationResult {
    Session(Session),
    Check(CheckOutcome),
}

impl OperationResult {
    pub fn session(&self) -> &Session {
        match self {
            Self::Session(session) => session,
            Self::Check(outcome) => outcome.session(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedOperation {
    pub operation_id: OperationId,
    /// True when the result was recorded by an earlier submission.
    pub replayed: bool,
    pub result: OperationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetails {
    pub session: Session,
    /// Oldest first.
    pub events: Vec<SessionEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<SessionId>,
    /// Sessions due for expiry whose audit append failed. Retried next sweep.
    pub failed: usize,
}
