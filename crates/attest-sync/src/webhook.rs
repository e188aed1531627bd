//! # Webhook Dispatcher
//!
//! Forwards every committed session event to an external endpoint.
//!
//! ## Delivery contract
//!
//! - The body is the JSON [`WebhookPayload`]; [`SIGNATURE_HEADER`] carries
//!   `sha256=<hex>`, an HMAC-SHA256 over exactly those body bytes.
//! - At-least-once: a retried delivery repeats the same body and the same
//!   [`DELIVERY_HEADER`] (`<session_id>:<sequence>`), which receivers use to
//!   deduplicate. [`ATTEMPT_HEADER`] counts from 1.
//! - 408, 429, 5xx and transport errors are retried with the queue's
//!   backoff policy. Other statuses, or exhausting the attempts, abandon the
//!   delivery with a warning.
//!
//! Events reach the dispatcher through the [`WebhookOutbox`], written in the
//! same transaction as the event. [`WebhookDispatcher::deliver_once`] leases
//! a batch from it and sends each delivery once, at most `concurrency` at a
//! time, so nothing is lost across a restart and a slow endpoint never
//! delays a transition.

use std::sync::Arc;
use std::time::Duration;

use attest_core::{EventId, OwnerId, SessionId, Timestamp};
use attest_crypto::{signature_header, SigningSecret};
use attest_geo::LocationFlag;
use attest_queue::{BackoffPolicy, DEFAULT_LEASE};
use attest_state::{CommittedEvent, SessionStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use url::Url;

use crate::error::WebhookError;
use crate::outbox::{DeliveryDisposition, OutboxConfig, OutboxDelivery, WebhookOutbox};

pub const SIGNATURE_HEADER: &str = "X-Attest-Signature";
pub const DELIVERY_HEADER: &str = "X-Attest-Delivery";
pub const ATTEMPT_HEADER: &str = "X-Attest-Attempt";

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: Url,
    pub secret: SigningSecret,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How long a leased delivery waits before another pass may retry it.
    pub lease: Duration,
    /// Deliveries leased per pass.
    pub batch_size: usize,
    /// Requests in flight at once.
    pub concurrency: usize,
}

impl WebhookConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    pub const DEFAULT_CONCURRENCY: usize = 4;

    pub fn new(url: Url, secret: SigningSecret) -> Self {
        Self {
            url,
            secret,
            max_attempts: attest_queue::DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            lease: DEFAULT_LEASE,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            concurrency: Self::DEFAULT_CONCURRENCY,
        }
    }

    /// The retry settings the outbox applies to each delivery.
    pub fn outbox(&self) -> OutboxConfig {
        OutboxConfig {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            lease: self.lease,
        }
    }
}

/// What the receiver gets for one committed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: EventId,
    pub event_type: String,
    pub outcome: String,
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    pub session_status: SessionStatus,
    /// Server time of the event.
    pub timestamp: Timestamp,
    pub flag: Option<LocationFlag>,
    pub distance_meters: Option<f64>,
    /// Audit sequence of the event's entry.
    pub sequence: u64,
}

impl WebhookPayload {
    pub fn delivery_id(&self) -> String {
        format!("{}:{}", self.session_id, self.sequence)
    }
}

impl From<&CommittedEvent> for WebhookPayload {
    fn from(c: &CommittedEvent) -> Self {
        Self {
            event_id: c.event.id,
            event_type: c.event.event_type.as_str().to_string(),
            outcome: c.event.outcome.as_str().to_string(),
            session_id: c.event.session_id,
            owner_id: c.owner.clone(),
            session_status: c.session_status,
            timestamp: c.event.server_timestamp,
            flag: c.event.location_flag,
            distance_meters: c.event.distance_meters,
            sequence: c.audit_sequence,
        }
    }
}

// ─── Delivery ────────────────────────────────────────────────────────

struct Deliverer {
    http: reqwest::Client,
    url: Url,
    secret: SigningSecret,
}

impl Deliverer {
    async fn send(&self, body: &[u8], delivery: &str, attempt: u32) -> Result<(), WebhookError> {
        let signature = signature_header(&self.secret, body)?;
        let resp = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(DELIVERY_HEADER, delivery)
            .header(ATTEMPT_HEADER, attempt.to_string())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status {
                status: status.as_u16(),
            })
        }
    }
}

/// What one [`WebhookDispatcher::deliver_once`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: u32,
    /// Failed and scheduled for another attempt.
    pub retried: u32,
    pub abandoned: u32,
}

impl DeliveryReport {
    pub fn processed(&self) -> u32 {
        self.delivered + self.retried + self.abandoned
    }
}

/// Sends the deliveries waiting in a [`WebhookOutbox`].
pub struct WebhookDispatcher {
    deliverer: Arc<Deliverer>,
    outbox: WebhookOutbox,
    batch_size: usize,
    permits: Arc<Semaphore>,
    /// Serializes passes so two never lease past each other's settlements.
    running: Mutex<()>,
}

impl WebhookDispatcher {
    /// Build the HTTP client.
    ///
    /// # Errors
    ///
    /// [`WebhookError::Client`] when the client cannot be built.
    pub fn new(config: WebhookConfig, outbox: WebhookOutbox) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;
        Ok(Self {
            deliverer: Arc::new(Deliverer {
                http,
                url: config.url,
                secret: config.secret,
            }),
            outbox,
            batch_size: config.batch_size.max(1),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            running: Mutex::new(()),
        })
    }

    pub fn outbox(&self) -> &WebhookOutbox {
        &self.outbox
    }

    /// Lease one batch and make one attempt at each delivery, then settle
    /// the results onto the outbox.
    ///
    /// # Errors
    ///
    /// Outbox storage errors. Endpoint failures are settled and counted.
    pub async fn deliver_once(&self) -> Result<DeliveryReport, WebhookError> {
        let _running = self.running.lock().await;
        let leased = self.outbox.lease(self.batch_size).await?;
        let mut report = DeliveryReport::default();
        if leased.is_empty() {
            return Ok(report);
        }

        let mut in_flight = JoinSet::new();
        for delivery in leased {
            let deliverer = self.deliverer.clone();
            let permits = self.permits.clone();
            in_flight.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        deliverer
                            .send(delivery.body.as_bytes(), &delivery.delivery_id, delivery.attempts + 1)
                            .await
                    }
                    Err(e) => Err(WebhookError::Client(e.to_string())),
                };
                (delivery, result)
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            let (delivery, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // The lease runs out and the delivery is retried.
                    tracing::warn!(error = %e, "webhook delivery task failed");
                    continue;
                }
            };
            self.settle(&delivery, result, &mut report).await?;
        }

        tracing::info!(
            delivered = report.delivered,
            retried = report.retried,
            abandoned = report.abandoned,
            "webhook delivery pass finished"
        );
        Ok(report)
    }

    async fn settle(
        &self,
        delivery: &OutboxDelivery,
        result: Result<(), WebhookError>,
        report: &mut DeliveryReport,
    ) -> Result<(), WebhookError> {
        let attempt = delivery.attempts + 1;
        let error = match result {
            Ok(()) => {
                self.outbox.mark_delivered(delivery.seq).await?;
                tracing::debug!(delivery = %delivery.delivery_id, attempts = attempt, "webhook delivered");
                report.delivered += 1;
                return Ok(());
            }
            Err(e) => e,
        };
        match self
            .outbox
            .mark_failed(delivery.seq, &error.to_string(), error.is_retryable())
            .await?
        {
            DeliveryDisposition::Retrying { next_eligible_at, .. } => {
                tracing::warn!(
                    delivery = %delivery.delivery_id,
                    attempts = attempt,
                    error = %error,
                    %next_eligible_at,
                    "webhook delivery failed, retry scheduled"
                );
                report.retried += 1;
            }
            DeliveryDisposition::Abandoned { attempts } => {
                tracing::warn!(
                    delivery = %delivery.delivery_id,
                    event_type = %delivery.event_type,
                    attempts,
                    error = %error,
                    "webhook delivery abandoned"
                );
                report.abandoned += 1;
            }
        }
        Ok(())
    }
}
