//! Post-commit notification of recorded session events.
//!
//! Observers run after the audit append and the session commit, outside any
//! session lock. They must not block: hand the event off and return.

use attest_core::OwnerId;
use tokio::sync::mpsc;

use crate::event::SessionEvent;
use crate::session::SessionStatus;

/// A session event that is durably audited and committed.
#[derive(Debug, Clone)]
pub struct CommittedEvent {
    pub event: SessionEvent,
    pub owner: OwnerId,
    /// Session status after the event.
    pub session_status: SessionStatus,
    /// Sequence of the audit entry recording the event.
    pub audit_sequence: u64,
}

pub trait TransitionObserver: Send + Sync {
    fn on_commit(&self, committed: &CommittedEvent);
}

/// Forwards committed events into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CommittedEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommittedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransitionObserver for ChannelObserver {
    fn on_commit(&self, committed: &CommittedEvent) {
        if self.tx.send(committed.clone()).is_err() {
            tracing::debug!(
                event_id = %committed.event.id,
                "transition observer receiver dropped"
            );
        }
    }
}
