//! # attest-queue: Offline Operation Queue
//!
//! Client-originated operations wait here until the reconciler has
//! submitted them to the session engine.
//!
//! ## Ordering
//!
//! [`OperationQueue::dequeue`] returns the eligible operation with the
//! highest [`Priority`], oldest first within a priority.
//!
//! ## Durability
//!
//! Every state change is a committed SQLite statement or transaction. A
//! dequeued operation is *leased*, not removed: if the process dies before
//! `mark_succeeded`/`mark_failed`, the lease runs out and the operation is
//! dequeued again. Delivery is therefore at-least-once; the engine's
//! idempotency ledger collapses the duplicates.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ─▶ pending ─dequeue─▶ processing ─mark_succeeded─▶ (completed)
//!              ▲                    │
//!              └──── backoff ◀──────┤ mark_failed, attempts < max
//!                                   ▼
//!                              dead letter ◀── mark_failed at max / mark_fatal
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;

pub use backoff::BackoffPolicy;
pub use config::{QueueConfig, DEFAULT_LEASE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PER_OWNER};
pub use error::QueueError;
pub use model::{FailureDisposition, NewOperation, OperationStatus, Priority, QueueStats, QueuedOperation};
pub use queue::OperationQueue;
