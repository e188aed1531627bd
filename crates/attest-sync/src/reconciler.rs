//! # Sync Reconciler
//!
//! One drain pass leases up to `batch_size` operations and settles each:
//!
//! | Submission result | Queue action |
//! |---|---|
//! | success (fresh or replayed) | `mark_succeeded` |
//! | [`SubmitError::Transient`] | `mark_failed`: backoff, or dead letter at the limit |
//! | [`SubmitError::Fatal`] | `mark_fatal`: dead letter now |
//! | [`SubmitError::Halted`] | `release`, and the pass stops |
//! | [`SubmitError::Client`] | `release`, and the pass stops |
//!
//! An operation completed through another path while leased (an operator
//! override, or a second worker) is counted as skipped, never as a second
//! success: the status is re-read before submitting, and an acknowledgement
//! that finds the operation already completed or gone settles nothing.

use std::sync::Arc;

use attest_queue::{FailureDisposition, OperationQueue, OperationStatus, QueueError};
use serde::Serialize;

use crate::error::SubmitError;
use crate::submitter::OperationSubmitter;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: u32,
    /// Failed transiently and scheduled for another attempt.
    pub retried: u32,
    pub dead_lettered: u32,
    /// Completed elsewhere while leased.
    pub skipped: u32,
    /// The pass stopped because the engine is halted.
    pub halted: bool,
}

impl DrainReport {
    pub fn processed(&self) -> u32 {
        self.succeeded + self.retried + self.dead_lettered + self.skipped
    }
}

pub struct SyncReconciler {
    queue: OperationQueue,
    submitter: Arc<dyn OperationSubmitter>,
    batch_size: usize,
    /// Serializes drain passes started from the scheduler and the API.
    running: tokio::sync::Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        queue: OperationQueue,
        submitter: Arc<dyn OperationSubmitter>,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            submitter,
            batch_size: batch_size.max(1),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Run one drain pass.
    ///
    /// # Errors
    ///
    /// Queue storage errors. Submission failures are settled onto the queue
    /// and counted in the report.
    pub async fn drain_once(&self) -> Result<DrainReport, QueueError> {
        let _running = self.running.lock().await;
        let mut report = DrainReport::default();

        for _ in 0..self.batch_size {
            let Some(op) = self.queue.dequeue().await? else {
                break;
            };
            let id = op.id().clone();

            if self.queue.status(&id).await? == Some(OperationStatus::Succeeded) {
                tracing::debug!(operation_id = %id, "operation already succeeded, skipping");
                report.skipped += 1;
                continue;
            }

            let settled = match self.submitter.submit(&op.submission).await {
                Ok(receipt) => {
                    if receipt.replayed {
                        tracing::info!(operation_id = %id, "duplicate submission collapsed by server");
                    }
                    self.queue.mark_succeeded(&id).await.map(|completed| {
                        if completed {
                            report.succeeded += 1;
                        } else {
                            report.skipped += 1;
                        }
                    })
                }
                Err(SubmitError::Transient(e)) => {
                    self.queue.mark_failed(&id, &e).await.map(|d| match d {
                        FailureDisposition::Retrying { .. } => report.retried += 1,
                        FailureDisposition::DeadLettered { .. } => report.dead_lettered += 1,
                    })
                }
                Err(SubmitError::Fatal(e)) => self.queue.mark_fatal(&id, &e).await.map(|()| {
                    report.dead_lettered += 1;
                }),
                Err(SubmitError::Halted(e)) => {
                    tracing::error!(operation_id = %id, error = %e, "engine halted, pausing drain");
                    self.queue.release(&id).await?;
                    report.halted = true;
                    break;
                }
                Err(SubmitError::Client(e)) => {
                    tracing::error!(operation_id = %id, error = %e, "submitter unusable, pausing drain");
                    self.queue.release(&id).await?;
                    break;
                }
            };

            match settled {
                Ok(()) => {}
                // Completed through another path while we held the lease.
                Err(QueueError::NotFound(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        if report.processed() > 0 || report.halted {
            tracing::info!(
                succeeded = report.succeeded,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                halted = report.halted,
                "drain pass finished"
            );
        }
        Ok(report)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
