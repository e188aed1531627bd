//! Audit entry model and hash computation.

use attest_core::{sha256_digest, CanonicalBytes, ContentDigest, EventId, SessionId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// The domain event an audit entry records.
///
/// `event_digest` commits to the full event body, so the chain covers fields
/// (coordinates, notes, client timestamp) that are not copied here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub event_type: String,
    pub location_flag: Option<String>,
    pub event_digest: ContentDigest,
}

/// One link of the audit chain. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub event: EventRef,
    pub recorded_at: Timestamp,
    pub content_hash: ContentDigest,
    pub previous_hash: ContentDigest,
}

/// Fields covered by `content_hash`.
#[derive(Serialize)]
struct ContentView<'a> {
    sequence: u64,
    event: &'a EventRef,
    recorded_at: &'a Timestamp,
}

impl AuditEntry {
    /// Build an entry, computing its content hash.
    pub fn seal(
        sequence: u64,
        event: EventRef,
        recorded_at: Timestamp,
        previous_hash: ContentDigest,
    ) -> Result<Self, AuditError> {
        let content_hash = content_hash(sequence, &event, &recorded_at)?;
        Ok(Self {
            sequence,
            event,
            recorded_at,
            content_hash,
            previous_hash,
        })
    }

    /// Recompute the content hash from the stored fields.
    pub fn recompute_content_hash(&self) -> Result<ContentDigest, AuditError> {
        content_hash(self.sequence, &self.event, &self.recorded_at)
    }

    /// Hash of this entry's full serialized form: the successor's
    /// `previous_hash`.
    pub fn link_hash(&self) -> Result<ContentDigest, AuditError> {
        Ok(sha256_digest(&CanonicalBytes::new(self)?))
    }
}

fn content_hash(
    sequence: u64,
    event: &EventRef,
    recorded_at: &Timestamp,
) -> Result<ContentDigest, AuditError> {
    let view = ContentView {
        sequence,
        event,
        recorded_at,
    };
    Ok(sha256_digest(&CanonicalBytes::new(&view)?))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use uuid::Uuid;

    pub fn event_ref(n: u128) -> EventRef {
        let digest = sha256_digest(&CanonicalBytes::new(&serde_json::json!({ "n": n as u64 })).unwrap());
        EventRef {
            event_id: EventId::from_uuid(Uuid::from_u128(n + 1)),
            session_id: SessionId::from_uuid(Uuid::from_u128(0xABCD)),
            event_type: "check_in".into(),
            location_flag: Some("granted".into()),
            event_digest: digest,
        }
    }
}
