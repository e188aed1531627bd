//! # Operation Submissions
//!
//! The shape in which a client intent travels from the offline queue to the
//! session engine, locally or over HTTP. The operation id is the idempotency
//! key; the payload stays an opaque JSON map until the engine decodes it for
//! the specific [`OperationKind`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{OperationId, SessionId};

/// Opaque key/value payload of an operation.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// What a queued operation asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateSession,
    CheckIn,
    CheckOut,
    EndSession,
    UpdateNotes,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSession => "create_session",
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
            Self::EndSession => "end_session",
            Self::UpdateNotes => "update_notes",
        }
    }

    /// Whether the operation targets an existing session.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Self::CreateSession)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_session" => Ok(Self::CreateSession),
            "check_in" => Ok(Self::CheckIn),
            "check_out" => Ok(Self::CheckOut),
            "end_session" => Ok(Self::EndSession),
            "update_notes" => Ok(Self::UpdateNotes),
            other => Err(ValidationError::UnknownVariant {
                kind: "operation kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A client intent presented for idempotent application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub payload: Payload,
}
