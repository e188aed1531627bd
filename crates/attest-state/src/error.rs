use attest_audit::AuditError;
use attest_core::{CanonicalizationError, ErrorClass, OperationId, OwnerId, SessionId, ValidationError};
use attest_geo::GeoError;
use thiserror::Error;

use crate::session::SessionStatus;

/// Errors from session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The operation is not permitted from the session's current status.
    #[error("cannot {operation} session {session_id} in status {status}")]
    InvalidState {
        session_id: SessionId,
        status: SessionStatus,
        operation: &'static str,
    },

    /// Check-in attempted after the deadline, before the sweep ran.
    #[error("session {0} has passed its check-in deadline")]
    SessionExpired(SessionId),

    #[error("owner {owner} already has open session {existing}")]
    DuplicateActiveSession { owner: OwnerId, existing: SessionId },

    #[error("notes of session {session_id} are locked in status {status}")]
    NotesLocked {
        session_id: SessionId,
        status: SessionStatus,
    },

    /// The operation id was already used for a different operation.
    #[error("operation {0} was already applied with a different kind or session")]
    OperationMismatch(OperationId),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Session state could not be read from or written to the database.
    #[error("session store error: {0}")]
    Store(String),
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::SessionNotFound(_) | Self::Validation(_) | Self::Geo(_) => ErrorClass::Validation,
            Self::InvalidState { .. }
            | Self::SessionExpired(_)
            | Self::DuplicateActiveSession { .. }
            | Self::NotesLocked { .. }
            | Self::OperationMismatch(_) => ErrorClass::Conflict,
            Self::Audit(e) => e.class(),
            Self::Store(_) => ErrorClass::Transient,
        }
    }

    /// A copy of a business rejection, for replay to a duplicate
    /// submission. `None` for audit and store failures, which are never
    /// replayed.
    pub fn replayable(&self) -> Option<SessionError> {
        Some(match self {
            Self::SessionNotFound(id) => Self::SessionNotFound(*id),
            Self::InvalidState {
                session_id,
                status,
                operation,
            } => Self::InvalidState {
                session_id: *session_id,
                status: *status,
                operation,
            },
            Self::SessionExpired(id) => Self::SessionExpired(*id),
            Self::DuplicateActiveSession { owner, existing } => Self::DuplicateActiveSession {
                owner: owner.clone(),
                existing: *existing,
            },
            Self::NotesLocked { session_id, status } => Self::NotesLocked {
                session_id: *session_id,
                status: *status,
            },
            Self::OperationMismatch(id) => Self::OperationMismatch(id.clone()),
            Self::Validation(msg) => Self::Validation(msg.clone()),
            Self::Geo(e) => Self::Geo(e.clone()),
            Self::Audit(_) | Self::Store(_) => return None,
        })
    }
}

impl From<ValidationError> for SessionError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<CanonicalizationError> for SessionError {
    fn from(e: CanonicalizationError) -> Self {
        Self::Audit(AuditError::Canonicalization(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{IdGenerator, RandomIds};

    #[test]
    fn business_errors_replay_and_audit_errors_do_not() {
        let id = RandomIds.session_id();
        let e = SessionError::InvalidState {
            session_id: id,
            status: SessionStatus::Ended,
            operation: "check_in",
        };
        assert_eq!(e.class(), ErrorClass::Conflict);
        assert_eq!(e.replayable().unwrap().to_string(), e.to_string());

        let audit = SessionError::Audit(AuditError::Storage("disk full".into()));
        assert_eq!(audit.class(), ErrorClass::Transient);
        assert!(audit.replayable().is_none());

        let halted = SessionError::Audit(AuditError::Halted { broken_at: 3 });
        assert_eq!(halted.class(), ErrorClass::Integrity);
        assert!(halted.replayable().is_none());

        let store = SessionError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(store.class(), ErrorClass::Transient);
        assert!(store.replayable().is_none());
    }

    #[test]
    fn geo_errors_are_validation() {
        let e = SessionError::from(GeoError::LatitudeOutOfRange(91.0));
        assert_eq!(e.class(), ErrorClass::Validation);
    }
}
