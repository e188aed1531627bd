use attest_core::{ErrorClass, OperationId, OwnerId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The id is already queued, dead-lettered, or completed.
    #[error("operation {0} is already known to the queue")]
    DuplicateOperation(OperationId),

    #[error("owner {owner} has {limit} operations queued, the maximum")]
    QueueFull { owner: OwnerId, limit: u32 },

    #[error("operation {0} not found")]
    NotFound(OperationId),

    #[error("invalid operation: {0}")]
    Validation(String),

    /// A stored row could not be decoded.
    #[error("queued operation {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("queue storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateOperation(_) => ErrorClass::Conflict,
            Self::NotFound(_) | Self::Validation(_) => ErrorClass::Validation,
            // Capacity frees up as the reconciler drains.
            Self::QueueFull { .. } | Self::Storage(_) => ErrorClass::Transient,
            Self::Corrupt { .. } => ErrorClass::Integrity,
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
