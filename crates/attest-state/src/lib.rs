//! # attest-state: Attendance Session State Machine
//!
//! ## States
//!
//! ```text
//!            check-in (granted)        check-out (granted)
//!   Active ─────────────────▶ CheckedIn ─────────────────▶ CheckedOut
//!     │ │                        │
//!     │ └── end ──▶ Ended ◀── end┘
//!     │
//!     └── deadline passed (sweep) ──▶ Expired
//! ```
//!
//! `CheckedIn → Expired` does not exist: a checked-in session ends only by
//! check-out or an explicit end.
//!
//! ## Invariants
//!
//! - At most one session per owner is `Active` or `CheckedIn`.
//! - Every check-in and check-out attempt records a [`SessionEvent`],
//!   whatever the location flag. Status changes only on `granted`.
//! - Every recorded event gets exactly one audit entry, appended *before*
//!   the session and event are committed. A failed append leaves the
//!   session untouched.
//! - All mutations of one session are serialized by a per-session lock;
//!   session creation is serialized per owner.
//! - [`SessionEngine::apply`] is idempotent per operation id.
//! - With a [`SessionStore`], session, event and ledger rows commit in the
//!   same transaction as the audit entry, and survive a restart.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod locks;
pub mod observer;
pub mod outcome;
pub mod session;
pub mod stats;
pub mod store;

pub use command::{
    CreateSessionInput, DestinationInput, EndSessionInput, LocationReport, LocationReportInput,
    UpdateNotesInput, DEFAULT_END_REASON,
};
pub use config::{EngineConfig, DEFAULT_EXPIRY_MINUTES};
pub use engine::SessionEngine;
pub use error::SessionError;
pub use event::{EventOutcome, SessionEvent, SessionEventType};
pub use locks::KeyedLocks;
pub use observer::{ChannelObserver, CommittedEvent, TransitionObserver};
pub use outcome::{AppliedOperation, CheckOutcome, OperationResult, SessionDetails, SweepReport};
pub use session::{Destination, Session, SessionStatus};
pub use stats::{SessionStatistics, StatsRange};
pub use store::{CommitJournal, SessionStore};
