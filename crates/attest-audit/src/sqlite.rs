//! SQLite-backed audit store.
//!
//! One row per entry, keyed by `sequence`. The primary key makes a second
//! insert at the same sequence a unique violation, which surfaces as
//! [`AuditError::SequenceConflict`].
//!
//! [`AuditStore::insert_attached`] runs the caller's rows in the same
//! transaction as the entry, so session state and its audit record are
//! stored together or not at all.

use std::str::FromStr;

use async_trait::async_trait;
use attest_core::{ContentDigest, EventId, SessionId, Timestamp};
use sqlx::{SqliteConnection, SqlitePool};

use crate::entry::{AuditEntry, EventRef};
use crate::error::AuditError;
use crate::store::{AttachedWrite, AuditStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    sequence      INTEGER PRIMARY KEY,
    event_id      TEXT NOT NULL,
    session_id    TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    location_flag TEXT,
    event_digest  TEXT NOT NULL,
    recorded_at   TEXT NOT NULL,
    content_hash  TEXT NOT NULL,
    previous_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_entries_session ON audit_entries(session_id);
"#;

const SELECT_COLUMNS: &str = "SELECT sequence, event_id, session_id, event_type, location_flag, \
     event_digest, recorded_at, content_hash, previous_hash FROM audit_entries";

#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    /// Wrap `pool`, creating the table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, AuditError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    sequence: i64,
    event_id: String,
    session_id: String,
    event_type: String,
    location_flag: Option<String>,
    event_digest: String,
    recorded_at: String,
    content_hash: String,
    previous_hash: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let sequence = u64::try_from(row.sequence).map_err(|_| AuditError::Corrupt {
            sequence: 0,
            reason: format!("negative sequence {}", row.sequence),
        })?;
        let corrupt = |reason: String| AuditError::Corrupt { sequence, reason };
        Ok(AuditEntry {
            sequence,
            event: EventRef {
                event_id: EventId::from_str(&row.event_id).map_err(|e| corrupt(e.to_string()))?,
                session_id: SessionId::from_str(&row.session_id)
                    .map_err(|e| corrupt(e.to_string()))?,
                event_type: row.event_type,
                location_flag: row.location_flag,
                event_digest: ContentDigest::from_hex(&row.event_digest)
                    .map_err(|e| corrupt(e.to_string()))?,
            },
            recorded_at: Timestamp::parse(&row.recorded_at).map_err(|e| corrupt(e.to_string()))?,
            content_hash: ContentDigest::from_hex(&row.content_hash)
                .map_err(|e| corrupt(e.to_string()))?,
            previous_hash: ContentDigest::from_hex(&row.previous_hash)
                .map_err(|e| corrupt(e.to_string()))?,
        })
    }
}

fn to_i64(sequence: u64) -> i64 {
    i64::try_from(sequence).unwrap_or(i64::MAX)
}

async fn insert_row(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<(), AuditError> {
    let result = sqlx::query(
        "INSERT INTO audit_entries (sequence, event_id, session_id, event_type, location_flag,
         event_digest, recorded_at, content_hash, previous_hash)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(to_i64(entry.sequence))
    .bind(entry.event.event_id.to_string())
    .bind(entry.event.session_id.to_string())
    .bind(&entry.event.event_type)
    .bind(&entry.event.location_flag)
    .bind(entry.event.event_digest.to_hex())
    .bind(entry.recorded_at.to_iso8601())
    .bind(entry.content_hash.to_hex())
    .bind(entry.previous_hash.to_hex())
    .execute(conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(AuditError::SequenceConflict(entry.sequence))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn head(&self) -> Result<Option<AuditEntry>, AuditError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY sequence DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(AuditEntry::try_from).transpose()
    }

    async fn insert(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut tx = self.pool.begin().await?;
        insert_row(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_attached(
        &self,
        entry: &AuditEntry,
        attached: &dyn AttachedWrite,
    ) -> Result<(), AuditError> {
        let mut tx = self.pool.begin().await?;
        insert_row(&mut *tx, entry).await?;
        attached.write(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, sequence: u64) -> Result<Option<AuditEntry>, AuditError> {
        let row = sqlx::query_as::<_, AuditRow>(&format!("{SELECT_COLUMNS} WHERE sequence = ?"))
            .bind(to_i64(sequence))
            .fetch_optional(&self.pool)
            .await?;
        row.map(AuditEntry::try_from).transpose()
    }

    async fn range(&self, from: u64, to: u64) -> Result<Vec<AuditEntry>, AuditError> {
        if from > to {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "{SELECT_COLUMNS} WHERE sequence BETWEEN ? AND ? ORDER BY sequence ASC"
        ))
        .bind(to_i64(from))
        .bind(to_i64(to))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::fixtures::event_ref;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn ts() -> Timestamp {
        Timestamp::parse("2026-02-01T10:00:00Z").unwrap()
    }

    #[tokio::test]
    async fn insert_and_read_back_preserves_hashes() {
        let store = SqliteAuditStore::new(memory_pool().await).await.unwrap();
        let entry = AuditEntry::seal(0, event_ref(7), ts(), ContentDigest::genesis()).unwrap();
        store.insert(&entry).await.unwrap();

        let back = store.get(0).await.unwrap().unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.recompute_content_hash().unwrap(), entry.content_hash);
        assert_eq!(store.head().await.unwrap().unwrap(), entry);
    }

    #[tokio::test]
    async fn primary_key_rejects_duplicate_sequence() {
        let store = SqliteAuditStore::new(memory_pool().await).await.unwrap();
        let entry = AuditEntry::seal(0, event_ref(1), ts(), ContentDigest::genesis()).unwrap();
        store.insert(&entry).await.unwrap();
        assert!(matches!(
            store.insert(&entry).await,
            Err(AuditError::SequenceConflict(0))
        ));
    }

    #[tokio::test]
    async fn garbage_hash_is_reported_as_corrupt() {
        let store = SqliteAuditStore::new(memory_pool().await).await.unwrap();
        let entry = AuditEntry::seal(0, event_ref(1), ts(), ContentDigest::genesis()).unwrap();
        store.insert(&entry).await.unwrap();
        sqlx::query("UPDATE audit_entries SET content_hash = 'nope' WHERE sequence = 0")
            .execute(store.pool())
            .await
            .unwrap();
        assert!(matches!(
            store.get(0).await,
            Err(AuditError::Corrupt { sequence: 0, .. })
        ));
    }

    #[tokio::test]
    async fn empty_store_has_no_head() {
        let store = SqliteAuditStore::new(memory_pool().await).await.unwrap();
        assert!(store.head().await.unwrap().is_none());
        assert!(store.range(0, 10).await.unwrap().is_empty());
    }

    struct Marker {
        fail: bool,
    }

    #[async_trait]
    impl AttachedWrite for Marker {
        async fn write(
            &self,
            conn: &mut SqliteConnection,
            entry: &AuditEntry,
        ) -> Result<(), sqlx::Error> {
            sqlx::query("INSERT INTO markers (sequence) VALUES (?)")
                .bind(to_i64(entry.sequence))
                .execute(&mut *conn)
                .await?;
            if self.fail {
                return Err(sqlx::Error::Protocol("marker refused".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn attached_rows_commit_and_roll_back_with_the_entry() {
        let store = SqliteAuditStore::new(memory_pool().await).await.unwrap();
        sqlx::query("CREATE TABLE markers (sequence INTEGER NOT NULL)")
            .execute(store.pool())
            .await
            .unwrap();

        let first = AuditEntry::seal(0, event_ref(1), ts(), ContentDigest::genesis()).unwrap();
        store
            .insert_attached(&first, &Marker { fail: false })
            .await
            .unwrap();

        let second =
            AuditEntry::seal(1, event_ref(2), ts(), first.link_hash().unwrap()).unwrap();
        let err = store
            .insert_attached(&second, &Marker { fail: true })
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Storage(_)));

        let markers: Vec<i64> = sqlx::query_scalar("SELECT sequence FROM markers")
            .fetch_all(store.pool())
            .await
            .unwrap();
        assert_eq!(markers, vec![0]);
        assert!(store.get(1).await.unwrap().is_none());
        assert_eq!(store.head().await.unwrap().unwrap().sequence, 0);
    }
}
