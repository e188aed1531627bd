//! # Application State
//!
//! Handles shared by every route: the session engine, the durable
//! operation queue, and the reconciler that drains it. Cheap to clone.

use std::sync::Arc;

use attest_core::Clock;
use attest_queue::OperationQueue;
use attest_state::SessionEngine;
use attest_sync::SyncReconciler;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub queue: OperationQueue,
    pub reconciler: Arc<SyncReconciler>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        engine: Arc<SessionEngine>,
        reconciler: Arc<SyncReconciler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            queue: reconciler.queue().clone(),
            reconciler,
            clock,
        }
    }
}
