use std::fmt;
use std::str::FromStr;

use attest_core::{OperationId, OwnerId, Submission, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

// ─── Priority ────────────────────────────────────────────────────────

/// Dequeue priority. Declaration order is dequeue order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Stored rank: lower dequeues first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.rank() == rank)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "priority",
                value: s.to_string(),
            })
    }
}

// ─── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    /// Leased to a reconciler.
    Processing,
    Succeeded,
    /// Dead-lettered.
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pending, Self::Processing, Self::Succeeded, Self::Failed]
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "operation status",
                value: s.to_string(),
            })
    }
}

// ─── Operations ──────────────────────────────────────────────────────

/// An operation as submitted by the client edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    #[serde(flatten)]
    pub submission: Submission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(default)]
    pub priority: Priority,
    /// Overrides the queue default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl NewOperation {
    pub fn new(submission: Submission, priority: Priority) -> Self {
        Self {
            submission,
            owner_id: None,
            priority,
            max_attempts: None,
        }
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedOperation {
    #[serde(flatten)]
    pub submission: Submission,
    pub owner_id: Option<OwnerId>,
    pub priority: Priority,
    pub status: OperationStatus,
    pub created_at: Timestamp,
    pub last_attempt_at: Option<Timestamp>,
    /// Not handed out by `dequeue` before this time.
    pub next_eligible_at: Timestamp,
    /// Failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    pub fn id(&self) -> &OperationId {
        &self.submission.operation_id
    }
}

/// What `mark_failed` did with the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum FailureDisposition {
    Retrying {
        attempts: u32,
        next_eligible_at: Timestamp,
    },
    DeadLettered {
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub dead_lettered: u64,
    pub completed: u64,
    pub oldest_pending_at: Option<Timestamp>,
    pub newest_dead_letter_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_dequeue_order() {
        let mut ps = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        ps.sort();
        assert_eq!(
            ps,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
        for p in Priority::ALL {
            assert_eq!(Priority::from_rank(p.rank()), Some(p));
            assert_eq!(p.as_str().parse::<Priority>().unwrap(), p);
        }
        assert_eq!(Priority::from_rank(9), None);
    }

    #[test]
    fn new_operation_wire_form() {
        let op: NewOperation = serde_json::from_value(serde_json::json!({
            "operation_id": "op-1",
            "kind": "check_in",
            "session_id": "6a1f7f36-3a3c-4c43-9f7e-2b0f3f3b8a11",
            "payload": {"latitude": 1.0, "longitude": 2.0},
            "priority": "critical",
            "owner_id": "c-7"
        }))
        .unwrap();
        assert_eq!(op.priority, Priority::Critical);
        assert_eq!(op.submission.operation_id.as_str(), "op-1");
        assert_eq!(op.owner_id.unwrap().as_str(), "c-7");
        assert!(op.max_attempts.is_none());
    }

    #[test]
    fn priority_defaults_to_medium() {
        let op: NewOperation = serde_json::from_value(serde_json::json!({
            "operation_id": "op-1",
            "kind": "create_session",
            "payload": {}
        }))
        .unwrap();
        assert_eq!(op.priority, Priority::Medium);
    }
}
