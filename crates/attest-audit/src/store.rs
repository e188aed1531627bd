use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::entry::AuditEntry;
use crate::error::AuditError;

/// Append-only persistence for audit entries.
///
/// Only [`AuditChain`](crate::AuditChain) writes through this trait.
/// Implementations must reject an insert whose sequence already exists with
/// [`AuditError::SequenceConflict`] and must never update or delete rows.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// The entry with the highest sequence, if any.
    async fn head(&self) -> Result<Option<AuditEntry>, AuditError>;

    async fn insert(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Insert `entry` and run `attached` in one transaction: both are
    /// stored, or neither is.
    ///
    /// Stores without a relational backend cannot honour this and refuse.
    async fn insert_attached(
        &self,
        entry: &AuditEntry,
        attached: &dyn AttachedWrite,
    ) -> Result<(), AuditError> {
        let _ = attached;
        Err(AuditError::Storage(format!(
            "audit entry {}: store cannot commit attached writes",
            entry.sequence
        )))
    }

    async fn get(&self, sequence: u64) -> Result<Option<AuditEntry>, AuditError>;

    /// Entries with `from <= sequence <= to`, ascending.
    async fn range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Rows that must commit together with an audit entry.
///
/// `write` runs inside the transaction that inserts `entry`; an error rolls
/// back both.
#[async_trait]
pub trait AttachedWrite: Send + Sync {
    async fn write(
        &self,
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
    ) -> Result<(), sqlx::Error>;
}
