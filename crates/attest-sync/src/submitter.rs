use std::sync::Arc;

use async_trait::async_trait;
use attest_core::{ErrorClass, Submission};
use attest_state::SessionEngine;

use crate::error::SubmitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// The server had already applied this operation id.
    pub replayed: bool,
}

/// Where the reconciler sends operations.
#[async_trait]
pub trait OperationSubmitter: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, SubmitError>;
}

/// Submits to an engine in the same process.
pub struct EngineSubmitter {
    engine: Arc<SessionEngine>,
}

impl EngineSubmitter {
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl OperationSubmitter for EngineSubmitter {
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, SubmitError> {
        match self.engine.apply(submission.clone()).await {
            Ok(applied) => Ok(SubmitReceipt {
                replayed: applied.replayed,
            }),
            Err(e) => Err(match e.class() {
                ErrorClass::Transient => SubmitError::Transient(e.to_string()),
                ErrorClass::Integrity => SubmitError::Halted(e.to_string()),
                ErrorClass::Validation | ErrorClass::Conflict => SubmitError::Fatal(e.to_string()),
            }),
        }
    }
}
