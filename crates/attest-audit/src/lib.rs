//! # attest-audit: Hash-Linked Audit Chain
//!
//! Every recorded session event is committed to an append-only chain of
//! [`AuditEntry`] values. Each entry carries:
//!
//! - `content_hash`: SHA-256 over the canonical form of its own fields,
//!   excluding `previous_hash`;
//! - `previous_hash`: SHA-256 over the canonical form of the predecessor's
//!   complete entry, or [`GENESIS_HASH`](attest_core::GENESIS_HASH) at
//!   sequence 0.
//!
//! Editing any stored field breaks either that entry's content hash or its
//! successor's link, and deleting an entry leaves a sequence gap. Both are
//! reported by [`AuditChain::verify`] with the first broken sequence.
//!
//! ## Concurrency
//!
//! Appends are globally serialized behind one async mutex held across the
//! store write, so no two entries share a sequence number or a predecessor.
//!
//! ## Integrity Halt
//!
//! A failed verification is an alarm, not a report. The chain records the
//! breach and refuses all further appends with [`AuditError::Halted`] until
//! an operator calls [`AuditChain::acknowledge_investigation`]. Session
//! transitions depend on a successful append, so they stop too.

pub mod chain;
pub mod entry;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use chain::{AuditChain, BreakKind, ChainVerification, IntegrityBreach};
pub use entry::{AuditEntry, EventRef};
pub use error::AuditError;
pub use memory::MemoryAuditStore;
pub use sqlite::SqliteAuditStore;
pub use store::{AttachedWrite, AuditStore};
