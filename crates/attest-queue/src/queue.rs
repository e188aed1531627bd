//! SQLite-backed operation queue.
//!
//! Three tables:
//!
//! - `queued_operations`: live operations, `pending` or `processing`;
//! - `dead_letters`: operations that exhausted their attempts or failed
//!   fatally, status `failed`;
//! - `completed_operations`: ids of operations that succeeded, kept so a
//!   completed id cannot be enqueued again.
//!
//! Times are stored as Unix seconds so ordering and eligibility are integer
//! comparisons.

use std::str::FromStr;
use std::sync::Arc;

use attest_core::{Clock, OperationId, OperationKind, OwnerId, SessionId, Submission, Timestamp};
use sqlx::SqlitePool;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::model::{
    FailureDisposition, NewOperation, OperationStatus, Priority, QueueStats, QueuedOperation,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_operations (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    id               TEXT NOT NULL UNIQUE,
    kind             TEXT NOT NULL,
    session_id       TEXT,
    owner_id         TEXT,
    payload          TEXT NOT NULL,
    priority         INTEGER NOT NULL,
    status           TEXT NOT NULL,
    created_at       INTEGER NOT NULL,
    last_attempt_at  INTEGER,
    next_eligible_at INTEGER NOT NULL,
    lease_expires_at INTEGER,
    attempts         INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL,
    last_error       TEXT
);
CREATE INDEX IF NOT EXISTS idx_queued_operations_ready
    ON queued_operations(status, priority, created_at, seq);
CREATE INDEX IF NOT EXISTS idx_queued_operations_owner ON queued_operations(owner_id);

CREATE TABLE IF NOT EXISTS dead_letters (
    id               TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    session_id       TEXT,
    owner_id         TEXT,
    payload          TEXT NOT NULL,
    priority         INTEGER NOT NULL,
    status           TEXT NOT NULL,
    created_at       INTEGER NOT NULL,
    last_attempt_at  INTEGER,
    next_eligible_at INTEGER NOT NULL,
    attempts         INTEGER NOT NULL,
    max_attempts     INTEGER NOT NULL,
    last_error       TEXT,
    failed_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dead_letters_failed_at ON dead_letters(failed_at);

CREATE TABLE IF NOT EXISTS completed_operations (
    id           TEXT PRIMARY KEY,
    completed_at INTEGER NOT NULL
);
"#;

const COLUMNS: &str = "id, kind, session_id, owner_id, payload, priority, status, created_at, \
     last_attempt_at, next_eligible_at, attempts, max_attempts, last_error";

/// Dequeue order.
const READY_ORDER: &str = "ORDER BY priority ASC, created_at ASC, seq ASC";

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    kind: String,
    session_id: Option<String>,
    owner_id: Option<String>,
    payload: String,
    priority: i64,
    status: String,
    created_at: i64,
    last_attempt_at: Option<i64>,
    next_eligible_at: i64,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<OperationRow> for QueuedOperation {
    type Error = QueueError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let id = row.id.clone();
        let corrupt = |reason: String| QueueError::Corrupt {
            id: id.clone(),
            reason,
        };
        let payload = match serde_json::from_str(&row.payload) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(other) => return Err(corrupt(format!("payload is not an object: {other}"))),
            Err(e) => return Err(corrupt(e.to_string())),
        };
        let ts = |secs: i64| Timestamp::from_epoch_secs(secs).map_err(|e| corrupt(e.to_string()));
        let count = |n: i64| u32::try_from(n).map_err(|_| corrupt(format!("bad count {n}")));

        Ok(QueuedOperation {
            submission: Submission {
                operation_id: OperationId::new(row.id.as_str()).map_err(|e| corrupt(e.to_string()))?,
                kind: OperationKind::from_str(&row.kind).map_err(|e| corrupt(e.to_string()))?,
                session_id: row
                    .session_id
                    .as_deref()
                    .map(SessionId::from_str)
                    .transpose()
                    .map_err(|e| corrupt(e.to_string()))?,
                payload,
            },
            owner_id: row
                .owner_id
                .map(OwnerId::new)
                .transpose()
                .map_err(|e| corrupt(e.to_string()))?,
            priority: Priority::from_rank(row.priority)
                .ok_or_else(|| corrupt(format!("bad priority {}", row.priority)))?,
            status: OperationStatus::from_str(&row.status).map_err(|e| corrupt(e.to_string()))?,
            created_at: ts(row.created_at)?,
            last_attempt_at: row.last_attempt_at.map(ts).transpose()?,
            next_eligible_at: ts(row.next_eligible_at)?,
            attempts: count(row.attempts)?,
            max_attempts: count(row.max_attempts)?,
            last_error: row.last_error,
        })
    }
}

fn decode_all(rows: Vec<OperationRow>) -> Result<Vec<QueuedOperation>, QueueError> {
    rows.into_iter().map(QueuedOperation::try_from).collect()
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// The durable operation queue.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct OperationQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl OperationQueue {
    /// Wrap `pool`, creating the tables if needed.
    pub async fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    // ── Enqueue / dequeue ───────────────────────────────────────────

    /// Add an operation, eligible immediately.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Validation`] when the kind needs a target session and
    ///   none is given, or `max_attempts` is zero.
    /// - [`QueueError::DuplicateOperation`] when the id is live,
    ///   dead-lettered, or completed.
    /// - [`QueueError::QueueFull`] when the owner is at capacity.
    pub async fn enqueue(&self, op: NewOperation) -> Result<QueuedOperation, QueueError> {
        let NewOperation {
            submission,
            owner_id,
            priority,
            max_attempts,
        } = op;
        if submission.kind.requires_session() && submission.session_id.is_none() {
            return Err(QueueError::Validation(format!(
                "{} requires a session_id",
                submission.kind
            )));
        }
        let max_attempts = max_attempts.unwrap_or(self.config.max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::Validation("max_attempts must be at least 1".into()));
        }

        let now = self.clock.now();
        let payload = serde_json::Value::Object(submission.payload.clone()).to_string();
        let id = submission.operation_id.as_str();

        // One statement: the duplicate and capacity checks cannot race the
        // insert.
        let result = sqlx::query(
            "INSERT INTO queued_operations
                (id, kind, session_id, owner_id, payload, priority, status,
                 created_at, next_eligible_at, attempts, max_attempts)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7, 0, ?8
             WHERE NOT EXISTS (SELECT 1 FROM dead_letters WHERE id = ?1)
               AND NOT EXISTS (SELECT 1 FROM completed_operations WHERE id = ?1)
               AND (?4 IS NULL
                    OR (SELECT COUNT(*) FROM queued_operations WHERE owner_id = ?4) < ?9)",
        )
        .bind(id)
        .bind(submission.kind.as_str())
        .bind(submission.session_id.map(|s| s.to_string()))
        .bind(owner_id.as_ref().map(|o| o.as_str().to_string()))
        .bind(payload)
        .bind(priority.rank())
        .bind(now.epoch_secs())
        .bind(i64::from(max_attempts))
        .bind(i64::from(self.config.max_per_owner))
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {}
            Ok(_) => {
                return Err(match owner_id {
                    Some(owner) if !self.known(&submission.operation_id).await? => {
                        QueueError::QueueFull {
                            owner,
                            limit: self.config.max_per_owner,
                        }
                    }
                    _ => QueueError::DuplicateOperation(submission.operation_id),
                })
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(QueueError::DuplicateOperation(submission.operation_id))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            operation_id = %submission.operation_id,
            kind = %submission.kind,
            priority = %priority,
            "operation enqueued"
        );
        Ok(QueuedOperation {
            submission,
            owner_id,
            priority,
            status: OperationStatus::Pending,
            created_at: now,
            last_attempt_at: None,
            next_eligible_at: now,
            attempts: 0,
            max_attempts,
            last_error: None,
        })
    }

    /// Lease the next eligible operation: highest priority, oldest first.
    ///
    /// An operation whose lease has run out is eligible again.
    pub async fn dequeue(&self) -> Result<Option<QueuedOperation>, QueueError> {
        let now = self.clock.now();
        let lease_until = now.saturating_add(self.config.lease_chrono());
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "UPDATE queued_operations
             SET status = 'processing', lease_expires_at = ?1, last_attempt_at = ?2
             WHERE seq = (
                 SELECT seq FROM queued_operations
                 WHERE (status = 'pending' AND next_eligible_at <= ?2)
                    OR (status = 'processing' AND lease_expires_at <= ?2)
                 {READY_ORDER}
                 LIMIT 1)
             RETURNING {COLUMNS}"
        ))
        .bind(lease_until.epoch_secs())
        .bind(now.epoch_secs())
        .fetch_optional(&self.pool)
        .await?;

        let op = row.map(QueuedOperation::try_from).transpose()?;
        if let Some(op) = &op {
            tracing::debug!(
                operation_id = %op.id(),
                attempts = op.attempts,
                "operation leased"
            );
        }
        Ok(op)
    }

    // ── Acknowledgement ─────────────────────────────────────────────

    /// Remove a live or dead-lettered operation and remember its id as
    /// completed.
    ///
    /// Returns `false` when the id was already completed, in which case
    /// nothing changes.
    pub async fn mark_succeeded(&self, id: &OperationId) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM queued_operations WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            + sqlx::query("DELETE FROM dead_letters WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        let recorded = sqlx::query(
            "INSERT INTO completed_operations (id, completed_at) VALUES (?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(now.epoch_secs())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 && recorded == 1 {
            tx.rollback().await?;
            return Err(QueueError::NotFound(id.clone()));
        }
        tx.commit().await?;
        if removed == 0 {
            return Ok(false);
        }
        tracing::debug!(operation_id = %id, "operation succeeded");
        Ok(true)
    }

    /// Record a retryable failure. The operation goes back to `pending`
    /// after a backoff delay, or to the dead-letter set once its attempts
    /// reach the maximum.
    pub async fn mark_failed(
        &self,
        id: &OperationId,
        error: &str,
    ) -> Result<FailureDisposition, QueueError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let counts: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE queued_operations
             SET attempts = attempts + 1, last_error = ?1, last_attempt_at = ?2
             WHERE id = ?3
             RETURNING attempts, max_attempts",
        )
        .bind(error)
        .bind(now.epoch_secs())
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((attempts, max_attempts)) = counts else {
            tx.rollback().await?;
            return Err(QueueError::NotFound(id.clone()));
        };
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);

        let disposition = if attempts >= u32::try_from(max_attempts).unwrap_or(0) {
            move_to_dead_letters(&mut tx, id, now).await?;
            tracing::warn!(
                operation_id = %id,
                attempts,
                error,
                "operation exhausted its attempts, dead-lettered"
            );
            FailureDisposition::DeadLettered { attempts }
        } else {
            let next = now.saturating_add(self.config.backoff.delay_chrono(attempts));
            sqlx::query(
                "UPDATE queued_operations
                 SET status = 'pending', lease_expires_at = NULL, next_eligible_at = ?
                 WHERE id = ?",
            )
            .bind(next.epoch_secs())
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
            tracing::warn!(
                operation_id = %id,
                attempts,
                next_eligible_at = %next,
                error,
                "operation failed, retry scheduled"
            );
            FailureDisposition::Retrying {
                attempts,
                next_eligible_at: next,
            }
        };
        tx.commit().await?;
        Ok(disposition)
    }

    /// Dead-letter immediately. For failures that no retry can fix.
    pub async fn mark_fatal(&self, id: &OperationId, error: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE queued_operations
             SET attempts = attempts + 1, last_error = ?1, last_attempt_at = ?2
             WHERE id = ?3",
        )
        .bind(error)
        .bind(now.epoch_secs())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Err(QueueError::NotFound(id.clone()));
        }
        move_to_dead_letters(&mut tx, id, now).await?;
        tx.commit().await?;
        tracing::warn!(operation_id = %id, error, "operation failed fatally, dead-lettered");
        Ok(())
    }

    /// Move a dead-lettered operation back to `pending` with its attempts
    /// reset.
    pub async fn requeue_dead_letter(&self, id: &OperationId) -> Result<QueuedOperation, QueueError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO queued_operations
                (id, kind, session_id, owner_id, payload, priority, status, created_at,
                 last_attempt_at, next_eligible_at, attempts, max_attempts, last_error)
             SELECT id, kind, session_id, owner_id, payload, priority, 'pending', created_at,
                    last_attempt_at, ?1, 0, max_attempts, last_error
             FROM dead_letters WHERE id = ?2",
        )
        .bind(now.epoch_secs())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Err(QueueError::NotFound(id.clone()));
        }
        sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {COLUMNS} FROM queued_operations WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(operation_id = %id, "dead letter requeued");
        QueuedOperation::try_from(row)
    }

    /// Return a leased operation to `pending` without counting an attempt,
    /// for when the submission target is unavailable rather than failing.
    pub async fn release(&self, id: &OperationId) -> Result<(), QueueError> {
        let updated = sqlx::query(
            "UPDATE queued_operations SET status = 'pending', lease_expires_at = NULL
             WHERE id = ? AND status = 'processing'",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(QueueError::NotFound(id.clone()));
        }
        Ok(())
    }

    /// Delete the owner's `pending` operations. Leased operations are left
    /// to finish. Returns the number removed.
    pub async fn clear_owner(&self, owner: &OwnerId) -> Result<u64, QueueError> {
        let removed = sqlx::query(
            "DELETE FROM queued_operations WHERE owner_id = ? AND status = 'pending'",
        )
        .bind(owner.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        tracing::info!(owner_id = %owner, removed, "owner queue cleared");
        Ok(removed)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Current status. `None` for ids the queue has never seen.
    pub async fn status(&self, id: &OperationId) -> Result<Option<OperationStatus>, QueueError> {
        if let Some(op) = self.get(id).await? {
            return Ok(Some(op.status));
        }
        let completed: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM completed_operations WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(completed.map(|_| OperationStatus::Succeeded))
    }

    /// A live or dead-lettered operation.
    pub async fn get(&self, id: &OperationId) -> Result<Option<QueuedOperation>, QueueError> {
        let row = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {COLUMNS} FROM queued_operations WHERE id = ?1
             UNION ALL
             SELECT {COLUMNS} FROM dead_letters WHERE id = ?1
             LIMIT 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueuedOperation::try_from).transpose()
    }

    /// Live operations in dequeue order.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<QueuedOperation>, QueueError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {COLUMNS} FROM queued_operations {READY_ORDER} LIMIT ?"
        ))
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    /// Dead letters, most recently failed first.
    pub async fn list_dead_lettered(
        &self,
        limit: usize,
    ) -> Result<Vec<QueuedOperation>, QueueError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "SELECT {COLUMNS} FROM dead_letters ORDER BY failed_at DESC, id ASC LIMIT ?"
        ))
        .bind(limit_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, processing, oldest): (i64, i64, Option<i64>) = sqlx::query_as(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                MIN(CASE WHEN status = 'pending' THEN created_at END)
             FROM queued_operations",
        )
        .fetch_one(&self.pool)
        .await?;
        let (dead, newest): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MAX(failed_at) FROM dead_letters")
                .fetch_one(&self.pool)
                .await?;
        let completed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM completed_operations")
            .fetch_one(&self.pool)
            .await?;

        let ts = |secs: i64| {
            Timestamp::from_epoch_secs(secs).map_err(|e| QueueError::Corrupt {
                id: String::new(),
                reason: e.to_string(),
            })
        };
        let count = |n: i64| u64::try_from(n).unwrap_or(0);
        Ok(QueueStats {
            pending: count(pending),
            processing: count(processing),
            dead_lettered: count(dead),
            completed: count(completed),
            oldest_pending_at: oldest.map(ts).transpose()?,
            newest_dead_letter_at: newest.map(ts).transpose()?,
        })
    }

    /// Whether the id is live, dead-lettered, or completed.
    async fn known(&self, id: &OperationId) -> Result<bool, QueueError> {
        Ok(self.status(id).await?.is_some())
    }
}

async fn move_to_dead_letters(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: &OperationId,
    now: Timestamp,
) -> Result<(), QueueError> {
    sqlx::query(
        "INSERT INTO dead_letters
            (id, kind, session_id, owner_id, payload, priority, status, created_at,
             last_attempt_at, next_eligible_at, attempts, max_attempts, last_error, failed_at)
         SELECT id, kind, session_id, owner_id, payload, priority, 'failed', created_at,
                last_attempt_at, next_eligible_at, attempts, max_attempts, last_error, ?1
         FROM queued_operations WHERE id = ?2",
    )
    .bind(now.epoch_secs())
    .bind(id.as_str())
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM queued_operations WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{IdGenerator, ManualClock, RandomIds};
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    fn t0() -> Timestamp {
        Timestamp::parse("2026-03-02T09:00:00Z").unwrap()
    }

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn queue_with(config: QueueConfig) -> (OperationQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let q = OperationQueue::new(memory_pool().await, clock.clone(), config)
            .await
            .unwrap();
        (q, clock)
    }

    async fn queue() -> (OperationQueue, Arc<ManualClock>) {
        queue_with(QueueConfig::default()).await
    }

    fn op_id(s: &str) -> OperationId {
        OperationId::new(s).unwrap()
    }

    fn check_in(id: &str, priority: Priority) -> NewOperation {
        let mut payload = serde_json::Map::new();
        payload.insert("latitude".into(), serde_json::json!(38.5));
        payload.insert("longitude".into(), serde_json::json!(-121.25));
        NewOperation::new(
            Submission {
                operation_id: op_id(id),
                kind: OperationKind::CheckIn,
                session_id: Some(RandomIds.session_id()),
                payload,
            },
            priority,
        )
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority() {
        let (q, _) = queue().await;
        q.enqueue(check_in("low", Priority::Low)).await.unwrap();
        q.enqueue(check_in("critical", Priority::Critical)).await.unwrap();
        q.enqueue(check_in("medium", Priority::Medium)).await.unwrap();

        let mut order = Vec::new();
        while let Some(op) = q.dequeue().await.unwrap() {
            order.push(op.id().as_str().to_string());
        }
        assert_eq!(order, vec!["critical", "medium", "low"]);
    }

    #[tokio::test]
    async fn fifo_within_priority() {
        let (q, clock) = queue().await;
        for id in ["a", "b", "c"] {
            q.enqueue(check_in(id, Priority::High)).await.unwrap();
            clock.advance(Duration::seconds(1));
        }
        // Same second: insertion order breaks the tie.
        q.enqueue(check_in("d", Priority::High)).await.unwrap();
        q.enqueue(check_in("e", Priority::High)).await.unwrap();
        let listed: Vec<_> = q
            .list_pending(10)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id().as_str().to_string())
            .collect();
        assert_eq!(listed, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(q.dequeue().await.unwrap().unwrap().id().as_str(), "a");
    }

    #[tokio::test]
    async fn payload_round_trips() {
        let (q, _) = queue().await;
        let new = check_in("op-1", Priority::Medium).with_owner(OwnerId::new("c-1").unwrap());
        let enqueued = q.enqueue(new.clone()).await.unwrap();
        let leased = q.dequeue().await.unwrap().unwrap();
        assert_eq!(leased.submission, new.submission);
        assert_eq!(leased.owner_id, new.owner_id);
        assert_eq!(leased.status, OperationStatus::Processing);
        assert_eq!(leased.created_at, enqueued.created_at);
        assert_eq!(leased.last_attempt_at, Some(t0()));
    }

    #[tokio::test]
    async fn duplicate_ids_rejected_in_every_state() {
        let (q, _) = queue().await;
        q.enqueue(check_in("live", Priority::Low)).await.unwrap();
        assert!(matches!(
            q.enqueue(check_in("live", Priority::High)).await,
            Err(QueueError::DuplicateOperation(_))
        ));

        q.enqueue(check_in("done", Priority::Critical)).await.unwrap();
        q.mark_succeeded(&op_id("done")).await.unwrap();
        assert!(matches!(
            q.enqueue(check_in("done", Priority::Low)).await,
            Err(QueueError::DuplicateOperation(_))
        ));

        q.enqueue(check_in("dead", Priority::Critical)).await.unwrap();
        q.mark_fatal(&op_id("dead"), "InvalidState").await.unwrap();
        assert!(matches!(
            q.enqueue(check_in("dead", Priority::Low)).await,
            Err(QueueError::DuplicateOperation(_))
        ));
    }

    #[tokio::test]
    async fn session_targeted_kinds_need_a_session() {
        let (q, _) = queue().await;
        let mut op = check_in("x", Priority::Low);
        op.submission.session_id = None;
        assert!(matches!(q.enqueue(op).await, Err(QueueError::Validation(_))));
        let zero = check_in("y", Priority::Low).with_max_attempts(0);
        assert!(matches!(q.enqueue(zero).await, Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn three_transient_failures_dead_letter() {
        let (q, clock) = queue().await;
        q.enqueue(check_in("op", Priority::High)).await.unwrap();
        let id = op_id("op");

        q.dequeue().await.unwrap().unwrap();
        let first = q.mark_failed(&id, "timeout").await.unwrap();
        assert_eq!(
            first,
            FailureDisposition::Retrying {
                attempts: 1,
                next_eligible_at: t0().saturating_add(Duration::seconds(10)),
            }
        );
        // Not eligible before the backoff elapses.
        assert!(q.dequeue().await.unwrap().is_none());
        clock.advance(Duration::seconds(10));
        q.dequeue().await.unwrap().unwrap();
        assert!(matches!(
            q.mark_failed(&id, "timeout").await.unwrap(),
            FailureDisposition::Retrying { attempts: 2, .. }
        ));

        clock.advance(Duration::seconds(20));
        q.dequeue().await.unwrap().unwrap();
        assert_eq!(
            q.mark_failed(&id, "server busy").await.unwrap(),
            FailureDisposition::DeadLettered { attempts: 3 }
        );

        assert!(q.list_pending(10).await.unwrap().is_empty());
        let dead = q.list_dead_lettered(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].status, OperationStatus::Failed);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error.as_deref(), Some("server busy"));
        assert_eq!(q.status(&id).await.unwrap(), Some(OperationStatus::Failed));

        clock.advance(Duration::hours(1));
        assert!(q.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_dequeued_again() {
        let (q, clock) = queue().await;
        q.enqueue(check_in("op", Priority::Medium)).await.unwrap();
        let first = q.dequeue().await.unwrap().unwrap();
        assert!(q.dequeue().await.unwrap().is_none());

        clock.advance(Duration::seconds(59));
        assert!(q.dequeue().await.unwrap().is_none());
        clock.advance(Duration::seconds(1));
        let again = q.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id(), first.id());
        assert_eq!(again.attempts, 0);
    }

    #[tokio::test]
    async fn release_returns_lease_without_attempt() {
        let (q, _) = queue().await;
        q.enqueue(check_in("op", Priority::Medium)).await.unwrap();
        let id = op_id("op");
        assert!(matches!(q.release(&id).await, Err(QueueError::NotFound(_))));
        q.dequeue().await.unwrap().unwrap();
        q.release(&id).await.unwrap();
        let again = q.dequeue().await.unwrap().unwrap();
        assert_eq!(again.attempts, 0);
    }

    #[tokio::test]
    async fn mark_succeeded_removes_and_tombstones() {
        let (q, _) = queue().await;
        q.enqueue(check_in("op", Priority::Medium)).await.unwrap();
        let id = op_id("op");
        q.dequeue().await.unwrap().unwrap();
        assert!(q.mark_succeeded(&id).await.unwrap());
        assert_eq!(q.status(&id).await.unwrap(), Some(OperationStatus::Succeeded));
        assert!(q.get(&id).await.unwrap().is_none());
        // A second acknowledgement changes nothing.
        assert!(!q.mark_succeeded(&id).await.unwrap());
        assert_eq!(q.stats().await.unwrap().completed, 1);
        assert!(matches!(
            q.mark_succeeded(&op_id("never")).await,
            Err(QueueError::NotFound(_))
        ));
        assert!(matches!(
            q.mark_failed(&id, "late").await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn manual_override_of_dead_letter() {
        let (q, _) = queue().await;
        q.enqueue(check_in("op", Priority::Medium)).await.unwrap();
        let id = op_id("op");
        q.mark_fatal(&id, "SessionNotFound").await.unwrap();
        assert!(q.mark_succeeded(&id).await.unwrap());
        assert!(q.list_dead_lettered(10).await.unwrap().is_empty());
        assert_eq!(q.status(&id).await.unwrap(), Some(OperationStatus::Succeeded));
    }

    #[tokio::test]
    async fn requeue_dead_letter_resets_attempts() {
        let (q, clock) = queue().await;
        q.enqueue(check_in("op", Priority::Low).with_max_attempts(1))
            .await
            .unwrap();
        let id = op_id("op");
        q.dequeue().await.unwrap().unwrap();
        assert!(matches!(
            q.mark_failed(&id, "boom").await.unwrap(),
            FailureDisposition::DeadLettered { attempts: 1 }
        ));

        clock.advance(Duration::minutes(5));
        let requeued = q.requeue_dead_letter(&id).await.unwrap();
        assert_eq!(requeued.status, OperationStatus::Pending);
        assert_eq!(requeued.attempts, 0);
        assert_eq!(requeued.created_at, t0());
        assert!(q.list_dead_lettered(10).await.unwrap().is_empty());
        assert_eq!(q.dequeue().await.unwrap().unwrap().id(), &id);
        assert!(matches!(
            q.requeue_dead_letter(&op_id("nope")).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn owner_capacity_and_clear() {
        let config = QueueConfig {
            max_per_owner: 2,
            ..QueueConfig::default()
        };
        let (q, _) = queue_with(config).await;
        let owner = OwnerId::new("c-1").unwrap();
        q.enqueue(check_in("a", Priority::Low).with_owner(owner.clone()))
            .await
            .unwrap();
        q.enqueue(check_in("b", Priority::Low).with_owner(owner.clone()))
            .await
            .unwrap();
        assert!(matches!(
            q.enqueue(check_in("c", Priority::Low).with_owner(owner.clone()))
                .await,
            Err(QueueError::QueueFull { limit: 2, .. })
        ));
        // Other owners and anonymous operations are unaffected.
        q.enqueue(check_in("d", Priority::Low).with_owner(OwnerId::new("c-2").unwrap()))
            .await
            .unwrap();
        q.enqueue(check_in("e", Priority::Low)).await.unwrap();

        // Leased operations survive a clear.
        let leased = q.dequeue().await.unwrap().unwrap();
        assert_eq!(leased.id().as_str(), "a");
        assert_eq!(q.clear_owner(&owner).await.unwrap(), 1);
        assert_eq!(q.list_pending(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stats_reflect_contents() {
        let (q, clock) = queue().await;
        assert_eq!(q.stats().await.unwrap(), QueueStats::default());

        q.enqueue(check_in("a", Priority::Low)).await.unwrap();
        clock.advance(Duration::seconds(5));
        q.enqueue(check_in("b", Priority::Critical)).await.unwrap();
        q.enqueue(check_in("c", Priority::Medium)).await.unwrap();
        q.dequeue().await.unwrap().unwrap();
        clock.advance(Duration::seconds(5));
        q.mark_fatal(&op_id("c"), "bad").await.unwrap();

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.oldest_pending_at, Some(t0()));
        assert_eq!(
            stats.newest_dead_letter_at,
            Some(t0().saturating_add(Duration::seconds(10)))
        );
    }

    #[tokio::test]
    async fn survives_restart_and_recovers_unacknowledged_lease() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
        let clock = Arc::new(ManualClock::new(t0()));

        {
            let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
            let q = OperationQueue::new(pool.clone(), clock.clone(), QueueConfig::default())
                .await
                .unwrap();
            q.enqueue(check_in("in-flight", Priority::Critical))
                .await
                .unwrap();
            q.enqueue(check_in("waiting", Priority::Low)).await.unwrap();
            let leased = q.dequeue().await.unwrap().unwrap();
            assert_eq!(leased.id().as_str(), "in-flight");
            // Crash before acknowledging.
            pool.close().await;
        }

        let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
        let q = OperationQueue::new(pool, clock.clone(), QueueConfig::default())
            .await
            .unwrap();
        assert_eq!(q.list_pending(10).await.unwrap().len(), 2);
        assert_eq!(q.dequeue().await.unwrap().unwrap().id().as_str(), "waiting");

        clock.advance(Duration::seconds(61));
        let recovered = q.dequeue().await.unwrap().unwrap();
        assert_eq!(recovered.id().as_str(), "in-flight");
        q.mark_succeeded(recovered.id()).await.unwrap();
        assert_eq!(
            q.status(&op_id("in-flight")).await.unwrap(),
            Some(OperationStatus::Succeeded)
        );
    }
}
