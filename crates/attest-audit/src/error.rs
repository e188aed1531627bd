use attest_core::{CanonicalizationError, ErrorClass};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    /// A verification failure halted the chain; appends are refused until
    /// the breach is acknowledged.
    #[error("audit chain halted: integrity breach at sequence {broken_at}")]
    Halted {
        /// First broken sequence reported by verification.
        broken_at: u64,
    },

    /// The store already holds an entry at this sequence. Something other
    /// than this chain is writing to the audit store.
    #[error("audit sequence {0} already exists")]
    SequenceConflict(u64),

    /// A stored row could not be decoded into an entry.
    #[error("audit entry {sequence} is unreadable: {reason}")]
    Corrupt {
        /// Sequence of the unreadable row.
        sequence: u64,
        /// Decoder message.
        reason: String,
    },

    /// Canonical serialization of an entry failed.
    #[error("audit entry canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// The backing store failed (I/O, locked database, pool exhausted).
    #[error("audit store error: {0}")]
    Storage(String),
}

impl AuditError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Storage(_) => ErrorClass::Transient,
            Self::Halted { .. }
            | Self::SequenceConflict(_)
            | Self::Corrupt { .. }
            | Self::Canonicalization(_) => ErrorClass::Integrity,
        }
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
