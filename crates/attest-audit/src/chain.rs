//! # Audit Chain
//!
//! Linearizable append and range verification over an [`AuditStore`].

use std::sync::Arc;

use attest_core::{Clock, ContentDigest, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::entry::{AuditEntry, EventRef};
use crate::error::AuditError;
use crate::store::{AttachedWrite, AuditStore};

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored fields no longer match the entry's content hash.
    ContentMismatch,
    /// `previous_hash` does not match the predecessor's link hash.
    LinkMismatch,
    /// An expected sequence number is absent.
    Missing,
    /// The stored row could not be decoded.
    Unreadable,
}

/// Outcome of [`AuditChain::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<BreakKind>,
    /// Entries checked before the first break (or all of them).
    pub checked: u64,
}

impl ChainVerification {
    fn intact(checked: u64) -> Self {
        Self {
            valid: true,
            broken_at: None,
            kind: None,
            checked,
        }
    }

    fn broken(at: u64, kind: BreakKind, checked: u64) -> Self {
        Self {
            valid: false,
            broken_at: Some(at),
            kind: Some(kind),
            checked,
        }
    }
}

/// A recorded integrity failure. While present, appends are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityBreach {
    pub broken_at: u64,
    pub kind: BreakKind,
    pub detected_at: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct ChainHead {
    next_sequence: u64,
    previous_hash: ContentDigest,
}

/// Append-only, hash-linked log of session events.
pub struct AuditChain {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    /// Serializes appends. `None` until loaded from the store, and reset to
    /// `None` whenever the store's state is uncertain.
    head: Mutex<Option<ChainHead>>,
    /// Highest sequence this process has appended. A store head below this
    /// means entries were removed from the tail.
    high_water: RwLock<Option<u64>>,
    breach: RwLock<Option<IntegrityBreach>>,
}

impl AuditChain {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            head: Mutex::new(None),
            high_water: RwLock::new(None),
            breach: RwLock::new(None),
        }
    }

    /// Append an entry recording `event`.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Halted`] while an integrity breach is unacknowledged.
    /// - Store errors. The in-memory head is discarded so the next append
    ///   re-reads it, which keeps a write that failed after reaching disk
    ///   from producing a duplicate sequence.
    pub async fn append(&self, event: EventRef) -> Result<AuditEntry, AuditError> {
        self.append_inner(event, None).await
    }

    /// Append an entry recording `event` and commit `attached` in the same
    /// store transaction. Errors as for [`append`](Self::append).
    pub async fn append_attached(
        &self,
        event: EventRef,
        attached: &dyn AttachedWrite,
    ) -> Result<AuditEntry, AuditError> {
        self.append_inner(event, Some(attached)).await
    }

    async fn append_inner(
        &self,
        event: EventRef,
        attached: Option<&dyn AttachedWrite>,
    ) -> Result<AuditEntry, AuditError> {
        self.ensure_not_halted()?;

        let mut head = self.head.lock().await;
        // A breach may have been recorded while waiting for the lock.
        self.ensure_not_halted()?;

        let current = match *head {
            Some(h) => h,
            None => self.load_head().await?,
        };

        let entry = AuditEntry::seal(
            current.next_sequence,
            event,
            self.clock.now(),
            current.previous_hash,
        )?;

        let stored = match attached {
            Some(attached) => self.store.insert_attached(&entry, attached).await,
            None => self.store.insert(&entry).await,
        };
        if let Err(e) = stored {
            *head = None;
            tracing::error!(sequence = entry.sequence, error = %e, "audit append failed");
            return Err(e);
        }

        *head = Some(ChainHead {
            next_sequence: entry.sequence + 1,
            previous_hash: entry.link_hash()?,
        });
        *self.high_water.write() = Some(entry.sequence);

        tracing::debug!(
            sequence = entry.sequence,
            session_id = %entry.event.session_id,
            event_type = %entry.event.event_type,
            "audit entry appended"
        );
        Ok(entry)
    }

    async fn load_head(&self) -> Result<ChainHead, AuditError> {
        Ok(match self.store.head().await? {
            Some(last) => ChainHead {
                next_sequence: last.sequence + 1,
                previous_hash: last.link_hash()?,
            },
            None => ChainHead {
                next_sequence: 0,
                previous_hash: ContentDigest::genesis(),
            },
        })
    }

    fn ensure_not_halted(&self) -> Result<(), AuditError> {
        match &*self.breach.read() {
            Some(b) => Err(AuditError::Halted {
                broken_at: b.broken_at,
            }),
            None => Ok(()),
        }
    }

    /// Verify entries `from..=to` (clamped to the current head).
    ///
    /// Each entry's content hash is recomputed and its `previous_hash`
    /// compared with the link hash of its predecessor (the genesis constant
    /// at sequence 0). The first failure is reported and recorded as a
    /// breach, halting appends.
    ///
    /// # Errors
    ///
    /// Only store failures. Integrity failures are reported in the result.
    pub async fn verify(&self, from: u64, to: u64) -> Result<ChainVerification, AuditError> {
        let result = self.check(from, to).await?;
        if let (false, Some(at), Some(kind)) = (result.valid, result.broken_at, result.kind) {
            self.record_breach(at, kind);
        }
        Ok(result)
    }

    /// Verify the whole chain.
    pub async fn verify_all(&self) -> Result<ChainVerification, AuditError> {
        self.verify(0, u64::MAX).await
    }

    async fn check(&self, from: u64, to: u64) -> Result<ChainVerification, AuditError> {
        let stored_head = match self.store.head().await {
            Ok(h) => h.map(|e| e.sequence),
            Err(AuditError::Corrupt { sequence, .. }) => Some(sequence),
            Err(e) => return Err(e),
        };

        let high_water = *self.high_water.read();
        if let Some(hw) = high_water {
            let truncated_at = match stored_head {
                None => Some(0),
                Some(h) if h < hw => Some(h + 1),
                _ => None,
            };
            if let Some(at) = truncated_at {
                if at <= to {
                    return Ok(ChainVerification::broken(at.max(from), BreakKind::Missing, 0));
                }
            }
        }

        let Some(last) = stored_head else {
            return Ok(ChainVerification::intact(0));
        };
        let to = to.min(last);
        if from > to {
            return Ok(ChainVerification::intact(0));
        }

        // Rows are decoded in order, so an unreadable row ends the scan
        // early; everything before it is still checked.
        let (entries, unreadable) = match self.store.range(from, to).await {
            Ok(entries) => (entries, None),
            Err(AuditError::Corrupt { sequence, .. }) => {
                let before = if sequence > from {
                    self.store.range(from, sequence - 1).await?
                } else {
                    Vec::new()
                };
                (before, Some(sequence))
            }
            Err(e) => return Err(e),
        };

        let mut expected_prev = if from == 0 {
            Some(ContentDigest::genesis())
        } else {
            match self.store.get(from - 1).await {
                Ok(Some(prev)) => Some(prev.link_hash()?),
                Ok(None) | Err(AuditError::Corrupt { .. }) => None,
                Err(e) => return Err(e),
            }
        };

        let mut expected_seq = from;
        let mut checked = 0u64;
        for entry in &entries {
            if entry.sequence != expected_seq {
                return Ok(ChainVerification::broken(expected_seq, BreakKind::Missing, checked));
            }
            if entry.recompute_content_hash()? != entry.content_hash {
                return Ok(ChainVerification::broken(
                    entry.sequence,
                    BreakKind::ContentMismatch,
                    checked,
                ));
            }
            if expected_prev != Some(entry.previous_hash) {
                return Ok(ChainVerification::broken(
                    entry.sequence,
                    BreakKind::LinkMismatch,
                    checked,
                ));
            }
            expected_prev = Some(entry.link_hash()?);
            expected_seq += 1;
            checked += 1;
        }

        if let Some(seq) = unreadable {
            let kind = if seq == expected_seq {
                BreakKind::Unreadable
            } else {
                BreakKind::Missing
            };
            return Ok(ChainVerification::broken(expected_seq.min(seq), kind, checked));
        }
        if expected_seq <= to {
            return Ok(ChainVerification::broken(expected_seq, BreakKind::Missing, checked));
        }
        Ok(ChainVerification::intact(checked))
    }

    fn record_breach(&self, broken_at: u64, kind: BreakKind) {
        let mut breach = self.breach.write();
        tracing::error!(
            broken_at,
            kind = ?kind,
            "AUDIT CHAIN INTEGRITY FAILURE: appends halted pending investigation"
        );
        // Keep the earliest known break.
        match &*breach {
            Some(existing) if existing.broken_at <= broken_at => {}
            _ => {
                *breach = Some(IntegrityBreach {
                    broken_at,
                    kind,
                    detected_at: self.clock.now(),
                })
            }
        }
    }

    /// The unacknowledged breach, if any.
    pub fn breach(&self) -> Option<IntegrityBreach> {
        self.breach.read().clone()
    }

    pub fn is_halted(&self) -> bool {
        self.breach.read().is_some()
    }

    /// Clear the halt after an operator has investigated a breach. The next
    /// append re-reads the chain head from the store.
    pub async fn acknowledge_investigation(&self) -> Option<IntegrityBreach> {
        let mut head = self.head.lock().await;
        *head = None;
        *self.high_water.write() = None;
        let cleared = self.breach.write().take();
        if let Some(b) = &cleared {
            tracing::warn!(broken_at = b.broken_at, "audit chain halt acknowledged; appends resumed");
        }
        cleared
    }

    /// Stored entries `from..=to`.
    pub async fn entries(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>, AuditError> {
        self.store.range(from, to).await
    }

    /// Sequence of the latest stored entry.
    pub async fn head_sequence(&self) -> Result<Option<u64>, AuditError> {
        Ok(self.store.head().await?.map(|e| e.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::fixtures::event_ref;
    use crate::memory::MemoryAuditStore;
    use attest_core::ManualClock;

    fn chain_with_store() -> (Arc<AuditChain>, Arc<MemoryAuditStore>) {
        let store = Arc::new(MemoryAuditStore::new());
        let clock = Arc::new(ManualClock::new(
            Timestamp::parse("2026-02-01T10:00:00Z").unwrap(),
        ));
        let chain = Arc::new(AuditChain::new(store.clone(), clock));
        (chain, store)
    }

    async fn append_n(chain: &AuditChain, n: u64) {
        for i in 0..n {
            chain.append(event_ref(i as u128)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_entry_links_to_genesis() {
        let (chain, _) = chain_with_store();
        let e = chain.append(event_ref(0)).await.unwrap();
        assert_eq!(e.sequence, 0);
        assert_eq!(e.previous_hash, ContentDigest::genesis());
    }

    #[tokio::test]
    async fn entries_link_to_predecessor() {
        let (chain, _) = chain_with_store();
        let a = chain.append(event_ref(0)).await.unwrap();
        let b = chain.append(event_ref(1)).await.unwrap();
        assert_eq!(b.sequence, 1);
        assert_eq!(b.previous_hash, a.link_hash().unwrap());
    }

    struct NoRows;

    #[async_trait::async_trait]
    impl AttachedWrite for NoRows {
        async fn write(
            &self,
            _: &mut sqlx::SqliteConnection,
            _: &AuditEntry,
        ) -> Result<(), sqlx::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refused_attached_append_does_not_consume_a_sequence() {
        let (chain, store) = chain_with_store();
        chain.append(event_ref(0)).await.unwrap();
        let err = chain.append_attached(event_ref(1), &NoRows).await.unwrap_err();
        assert!(matches!(err, AuditError::Storage(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(chain.append(event_ref(2)).await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn untouched_chain_verifies() {
        let (chain, _) = chain_with_store();
        append_n(&chain, 10).await;
        let v = chain.verify_all().await.unwrap();
        assert!(v.valid);
        assert_eq!(v.checked, 10);
        assert_eq!(v.broken_at, None);

        let partial = chain.verify(4, 7).await.unwrap();
        assert!(partial.valid);
        assert_eq!(partial.checked, 4);
    }

    #[tokio::test]
    async fn empty_chain_verifies() {
        let (chain, _) = chain_with_store();
        assert!(chain.verify_all().await.unwrap().valid);
    }

    #[tokio::test]
    async fn edited_content_breaks_at_that_entry() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 6).await;
        store.with_rows(|rows| {
            if let Some(e) = rows.get_mut(&3) {
                e.event.location_flag = Some("granted_by_override".into());
            }
        });
        let v = chain.verify_all().await.unwrap();
        assert!(!v.valid);
        assert_eq!(v.broken_at, Some(3));
        assert_eq!(v.kind, Some(BreakKind::ContentMismatch));
    }

    #[tokio::test]
    async fn rehashed_edit_breaks_the_successor_link() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 6).await;
        store.with_rows(|rows| {
            if let Some(e) = rows.get_mut(&2) {
                e.event.event_type = "check_out".into();
                e.content_hash = e.recompute_content_hash().unwrap();
            }
        });
        let v = chain.verify_all().await.unwrap();
        assert_eq!(v.broken_at, Some(3));
        assert_eq!(v.kind, Some(BreakKind::LinkMismatch));
    }

    #[tokio::test]
    async fn deleted_entry_is_reported_missing() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 6).await;
        store.with_rows(|rows| rows.remove(&4));
        let v = chain.verify_all().await.unwrap();
        assert_eq!(v.broken_at, Some(4));
        assert_eq!(v.kind, Some(BreakKind::Missing));
    }

    #[tokio::test]
    async fn truncated_tail_is_reported_missing() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 5).await;
        store.with_rows(|rows| rows.remove(&4));
        let v = chain.verify_all().await.unwrap();
        assert_eq!(v.broken_at, Some(4));
    }

    #[tokio::test]
    async fn breach_halts_appends_until_acknowledged() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 3).await;
        store.with_rows(|rows| {
            if let Some(e) = rows.get_mut(&1) {
                e.previous_hash = ContentDigest::genesis();
            }
        });
        let v = chain.verify_all().await.unwrap();
        assert_eq!(v.broken_at, Some(1));
        assert!(chain.is_halted());
        assert!(matches!(
            chain.append(event_ref(9)).await,
            Err(AuditError::Halted { broken_at: 1 })
        ));

        let cleared = chain.acknowledge_investigation().await.unwrap();
        assert_eq!(cleared.broken_at, 1);
        let next = chain.append(event_ref(9)).await.unwrap();
        assert_eq!(next.sequence, 3);
    }

    #[tokio::test]
    async fn concurrent_appends_are_linearizable() {
        let (chain, _) = chain_with_store();
        let mut handles = Vec::new();
        for i in 0..64u128 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move { chain.append(event_ref(i)).await }));
        }
        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap().unwrap().sequence);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (0..64).collect::<Vec<u64>>());
        assert!(chain.verify_all().await.unwrap().valid);
    }

    #[tokio::test]
    async fn new_chain_over_existing_store_continues_sequence() {
        let (chain, store) = chain_with_store();
        append_n(&chain, 3).await;
        let clock = Arc::new(ManualClock::new(
            Timestamp::parse("2026-02-01T11:00:00Z").unwrap(),
        ));
        let reopened = AuditChain::new(store, clock);
        let e = reopened.append(event_ref(3)).await.unwrap();
        assert_eq!(e.sequence, 3);
        assert!(reopened.verify_all().await.unwrap().valid);
    }
}
