//! In-process audit store for tests and embedded use.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::entry::AuditEntry;
use crate::error::AuditError;
use crate::store::AuditStore;

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: RwLock<BTreeMap<u64, AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Direct row access for tamper tests.
    #[cfg(test)]
    pub(crate) fn with_rows<R>(&self, f: impl FnOnce(&mut BTreeMap<u64, AuditEntry>) -> R) -> R {
        f(&mut self.entries.write())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn head(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.read().values().next_back().cloned())
    }

    async fn insert(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.sequence) {
            return Err(AuditError::SequenceConflict(entry.sequence));
        }
        entries.insert(entry.sequence, entry.clone());
        Ok(())
    }

    async fn get(&self, sequence: u64) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.read().get(&sequence).cloned())
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>, AuditError> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .entries
            .read()
            .range(from..=to)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
