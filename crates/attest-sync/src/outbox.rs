//! # Webhook Outbox
//!
//! Committed events waiting for webhook delivery, one row per
//! `(session_id, sequence)`.
//!
//! Rows are written by [`CommitJournal::record`] inside the transaction that
//! commits the event, so an event is queued for delivery exactly when it is
//! stored. Delivery then follows the operation queue's pattern: a leased row
//! is invisible until its lease runs out, a failed attempt goes back to
//! `pending` after a backoff delay, and a row that exhausts its attempts or
//! is refused outright is kept as `abandoned`.
//!
//! ```text
//! record ─▶ pending ─lease─▶ processing ─mark_delivered─▶ (removed)
//!             ▲                   │
//!             └──── backoff ◀─────┤ mark_failed, retryable, attempts < max
//!                                 ▼
//!                             abandoned
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attest_core::{Clock, Timestamp};
use attest_queue::{BackoffPolicy, DEFAULT_LEASE, DEFAULT_MAX_ATTEMPTS};
use attest_state::{CommitJournal, CommittedEvent};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::WebhookError;
use crate::webhook::WebhookPayload;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_outbox (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id       TEXT NOT NULL,
    sequence         INTEGER NOT NULL,
    event_type       TEXT NOT NULL,
    body             TEXT NOT NULL,
    status           TEXT NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    next_eligible_at INTEGER NOT NULL,
    lease_expires_at INTEGER,
    last_error       TEXT,
    UNIQUE (session_id, sequence)
);
CREATE INDEX IF NOT EXISTS idx_webhook_outbox_ready
    ON webhook_outbox(status, next_eligible_at, seq);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// How long a leased delivery stays invisible before it is handed out
    /// again.
    pub lease: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            lease: DEFAULT_LEASE,
        }
    }
}

/// A leased delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxDelivery {
    /// Row key for settling the delivery.
    pub seq: i64,
    /// `<session_id>:<sequence>`, stable across attempts.
    pub delivery_id: String,
    pub event_type: String,
    /// The exact bytes every attempt sends and signs.
    pub body: String,
    /// Attempts made before this one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDisposition {
    Retrying { attempts: u32, next_eligible_at: Timestamp },
    Abandoned { attempts: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub abandoned: u64,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    seq: i64,
    session_id: String,
    sequence: i64,
    event_type: String,
    body: String,
    attempts: i64,
}

impl From<DeliveryRow> for OutboxDelivery {
    fn from(row: DeliveryRow) -> Self {
        Self {
            seq: row.seq,
            delivery_id: format!("{}:{}", row.session_id, row.sequence),
            event_type: row.event_type,
            body: row.body,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
        }
    }
}

fn secs(d: Duration) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Durable delivery queue for committed events.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct WebhookOutbox {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
}

impl WebhookOutbox {
    /// Wrap `pool`, creating the table if needed.
    pub async fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Result<Self, WebhookError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Lease up to `limit` eligible deliveries, oldest first. A delivery
    /// whose lease has run out is eligible again.
    pub async fn lease(&self, limit: usize) -> Result<Vec<OutboxDelivery>, WebhookError> {
        let now = self.clock.now();
        let lease_until = now.saturating_add(secs(self.config.lease));
        let mut rows = sqlx::query_as::<_, DeliveryRow>(
            "UPDATE webhook_outbox
             SET status = 'processing', lease_expires_at = ?1
             WHERE seq IN (
                 SELECT seq FROM webhook_outbox
                 WHERE (status = 'pending' AND next_eligible_at <= ?2)
                    OR (status = 'processing' AND lease_expires_at <= ?2)
                 ORDER BY seq ASC
                 LIMIT ?3)
             RETURNING seq, session_id, sequence, event_type, body, attempts",
        )
        .bind(lease_until.epoch_secs())
        .bind(now.epoch_secs())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.sort_by_key(|r| r.seq);
        Ok(rows.into_iter().map(OutboxDelivery::from).collect())
    }

    /// Remove a delivered row. Returns `false` if it was already gone.
    pub async fn mark_delivered(&self, seq: i64) -> Result<bool, WebhookError> {
        let removed = sqlx::query("DELETE FROM webhook_outbox WHERE seq = ?")
            .bind(seq)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed == 1)
    }

    /// Record a failed attempt. Retryable failures go back to `pending`
    /// after a backoff delay until the attempts run out; anything else is
    /// abandoned now.
    pub async fn mark_failed(
        &self,
        seq: i64,
        error: &str,
        retryable: bool,
    ) -> Result<DeliveryDisposition, WebhookError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let counts: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE webhook_outbox SET attempts = attempts + 1, last_error = ?1
             WHERE seq = ?2
             RETURNING attempts, max_attempts",
        )
        .bind(error)
        .bind(seq)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((attempts, max_attempts)) = counts else {
            tx.rollback().await?;
            return Err(WebhookError::Storage(format!("outbox row {seq} not found")));
        };
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);

        let disposition = if !retryable || attempts >= u32::try_from(max_attempts).unwrap_or(0) {
            sqlx::query(
                "UPDATE webhook_outbox SET status = 'abandoned', lease_expires_at = NULL
                 WHERE seq = ?",
            )
            .bind(seq)
            .execute(&mut *tx)
            .await?;
            DeliveryDisposition::Abandoned { attempts }
        } else {
            let next = now.saturating_add(self.config.backoff.delay_chrono(attempts));
            sqlx::query(
                "UPDATE webhook_outbox
                 SET status = 'pending', lease_expires_at = NULL, next_eligible_at = ?
                 WHERE seq = ?",
            )
            .bind(next.epoch_secs())
            .bind(seq)
            .execute(&mut *tx)
            .await?;
            DeliveryDisposition::Retrying {
                attempts,
                next_eligible_at: next,
            }
        };
        tx.commit().await?;
        Ok(disposition)
    }

    pub async fn stats(&self) -> Result<OutboxStats, WebhookError> {
        let (pending, processing, abandoned): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'abandoned' THEN 1 ELSE 0 END), 0)
             FROM webhook_outbox",
        )
        .fetch_one(&self.pool)
        .await?;
        let count = |n: i64| u64::try_from(n).unwrap_or(0);
        Ok(OutboxStats {
            pending: count(pending),
            processing: count(processing),
            abandoned: count(abandoned),
        })
    }
}

#[async_trait]
impl CommitJournal for WebhookOutbox {
    async fn record(
        &self,
        conn: &mut SqliteConnection,
        committed: &CommittedEvent,
    ) -> Result<(), sqlx::Error> {
        let payload = WebhookPayload::from(committed);
        let body = serde_json::to_string(&payload)
            .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize webhook payload: {e}")))?;
        let now = self.clock.now().epoch_secs();
        sqlx::query(
            "INSERT INTO webhook_outbox
                (session_id, sequence, event_type, body, status, attempts, max_attempts,
                 created_at, next_eligible_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)
             ON CONFLICT(session_id, sequence) DO NOTHING",
        )
        .bind(payload.session_id.to_string())
        .bind(i64::try_from(payload.sequence).unwrap_or(i64::MAX))
        .bind(&payload.event_type)
        .bind(body)
        .bind(i64::from(self.config.max_attempts.max(1)))
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
