//! # attest-sync: Reconciliation and Outbound Delivery
//!
//! - [`SyncReconciler`] drains the [`OperationQueue`](attest_queue::OperationQueue)
//!   into an [`OperationSubmitter`], using each operation id as the
//!   idempotency key, and settles every outcome back onto the queue.
//! - [`Scheduler`] runs the drain, the session expiry sweep and webhook
//!   delivery on fixed intervals until shut down.
//! - [`WebhookOutbox`] records every committed session event in the
//!   commit's own transaction; [`WebhookDispatcher`] delivers them to an
//!   external endpoint with an HMAC signature, retrying with the queue's
//!   backoff policy. Delivery never blocks or rolls back a transition.
//!
//! Every client is constructed explicitly and passed in; nothing here holds
//! process-wide state.

pub mod error;
pub mod http;
pub mod outbox;
pub mod reconciler;
pub mod scheduler;
pub mod submitter;
pub mod webhook;

pub use error::{SubmitError, WebhookError};
pub use http::{HttpSubmitter, HttpSubmitterConfig};
pub use outbox::{DeliveryDisposition, OutboxConfig, OutboxDelivery, OutboxStats, WebhookOutbox};
pub use reconciler::{DrainReport, SyncReconciler, DEFAULT_BATCH_SIZE};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use submitter::{EngineSubmitter, OperationSubmitter, SubmitReceipt};
pub use webhook::{
    DeliveryReport, WebhookConfig, WebhookDispatcher, WebhookPayload, ATTEMPT_HEADER,
    DELIVERY_HEADER, SIGNATURE_HEADER,
};
