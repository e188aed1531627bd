//! # Session Persistence
//!
//! SQLite tables behind the engine's in-memory view:
//!
//! - `sessions`: one row per session, rewritten on every change;
//! - `session_events`: one row per recorded event, with the sequence of the
//!   audit entry that records it;
//! - `operation_ledger`: the first terminal result of each applied
//!   operation id, so duplicates are replayed across restarts.
//!
//! Rows for a recorded event are written by [`SessionWrite`] inside the
//! audit store's transaction, so a session never reaches a status whose
//! audit entry was not stored, and the reverse. The engine updates its
//! in-memory table only after that transaction commits, and rebuilds the
//! table from [`SessionStore::load`] at startup.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use attest_audit::{AttachedWrite, AuditEntry};
use attest_core::{OperationId, OperationKind, OwnerId, SessionId, Timestamp};
use attest_geo::GeoError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::SessionError;
use crate::event::SessionEvent;
use crate::observer::CommittedEvent;
use crate::outcome::{CheckOutcome, OperationResult};
use crate::session::{transition_name, Destination, Session, SessionStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    owner_id       TEXT NOT NULL,
    destination    TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    checked_in_at  TEXT,
    checked_out_at TEXT,
    notes          TEXT NOT NULL,
    is_complete    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id, seq);

CREATE TABLE IF NOT EXISTS session_events (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    session_id     TEXT NOT NULL REFERENCES sessions(id),
    event_type     TEXT NOT NULL,
    audit_sequence INTEGER NOT NULL UNIQUE,
    body           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_events_session ON session_events(session_id, seq);

CREATE TABLE IF NOT EXISTS operation_ledger (
    operation_id TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    session_id   TEXT,
    result_kind  TEXT NOT NULL,
    result       TEXT NOT NULL,
    recorded_at  TEXT NOT NULL
);
"#;

// ─── Ledger ──────────────────────────────────────────────────────────

/// The recorded result of one operation id.
#[derive(Debug)]
pub(crate) struct LedgerEntry {
    pub kind: OperationKind,
    pub session_id: Option<SessionId>,
    pub outcome: Result<OperationResult, SessionError>,
}

/// Stored form of a replayable [`SessionError`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
enum Rejection {
    SessionNotFound {
        session_id: SessionId,
    },
    InvalidState {
        session_id: SessionId,
        status: SessionStatus,
        operation: String,
    },
    SessionExpired {
        session_id: SessionId,
    },
    DuplicateActiveSession {
        owner: OwnerId,
        existing: SessionId,
    },
    NotesLocked {
        session_id: SessionId,
        status: SessionStatus,
    },
    OperationMismatch {
        operation_id: OperationId,
    },
    Validation {
        message: String,
    },
    Geo {
        #[serde(rename = "geo_error")]
        error: GeoError,
    },
}

impl Rejection {
    fn from_error(e: &SessionError) -> Option<Self> {
        Some(match e {
            SessionError::SessionNotFound(id) => Self::SessionNotFound { session_id: *id },
            SessionError::InvalidState {
                session_id,
                status,
                operation,
            } => Self::InvalidState {
                session_id: *session_id,
                status: *status,
                operation: (*operation).to_string(),
            },
            SessionError::SessionExpired(id) => Self::SessionExpired { session_id: *id },
            SessionError::DuplicateActiveSession { owner, existing } => {
                Self::DuplicateActiveSession {
                    owner: owner.clone(),
                    existing: *existing,
                }
            }
            SessionError::NotesLocked { session_id, status } => Self::NotesLocked {
                session_id: *session_id,
                status: *status,
            },
            SessionError::OperationMismatch(id) => Self::OperationMismatch {
                operation_id: id.clone(),
            },
            SessionError::Validation(message) => Self::Validation {
                message: message.clone(),
            },
            SessionError::Geo(error) => Self::Geo {
                error: error.clone(),
            },
            SessionError::Audit(_) | SessionError::Store(_) => return None,
        })
    }

    fn into_error(self) -> Result<SessionError, String> {
        Ok(match self {
            Self::SessionNotFound { session_id } => SessionError::SessionNotFound(session_id),
            Self::InvalidState {
                session_id,
                status,
                operation,
            } => SessionError::InvalidState {
                session_id,
                status,
                operation: transition_name(&operation)
                    .ok_or_else(|| format!("unknown transition {operation:?}"))?,
            },
            Self::SessionExpired { session_id } => SessionError::SessionExpired(session_id),
            Self::DuplicateActiveSession { owner, existing } => {
                SessionError::DuplicateActiveSession { owner, existing }
            }
            Self::NotesLocked { session_id, status } => {
                SessionError::NotesLocked { session_id, status }
            }
            Self::OperationMismatch { operation_id } => {
                SessionError::OperationMismatch(operation_id)
            }
            Self::Validation { message } => SessionError::Validation(message),
            Self::Geo { error } => SessionError::Geo(error),
        })
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String, sqlx::Error> {
    serde_json::to_string(value)
        .map_err(|e| sqlx::Error::Protocol(format!("failed to serialize {what}: {e}")))
}

fn encode_outcome(
    outcome: &Result<OperationResult, SessionError>,
) -> Result<(&'static str, String), sqlx::Error> {
    match outcome {
        Ok(OperationResult::Session(session)) => Ok(("session", to_json(session, "session result")?)),
        Ok(OperationResult::Check(check)) => Ok(("check", to_json(check, "check result")?)),
        Err(e) => match Rejection::from_error(e) {
            Some(rejection) => Ok(("rejected", to_json(&rejection, "rejection")?)),
            None => Err(sqlx::Error::Protocol(format!(
                "operation error is not recordable: {e}"
            ))),
        },
    }
}

fn decode_outcome(
    result_kind: &str,
    body: &str,
) -> Result<Result<OperationResult, SessionError>, String> {
    match result_kind {
        "session" => serde_json::from_str::<Session>(body)
            .map(|s| Ok(OperationResult::Session(s)))
            .map_err(|e| e.to_string()),
        "check" => serde_json::from_str::<CheckOutcome>(body)
            .map(|c| Ok(OperationResult::Check(c)))
            .map_err(|e| e.to_string()),
        "rejected" => serde_json::from_str::<Rejection>(body)
            .map_err(|e| e.to_string())?
            .into_error()
            .map(Err),
        other => Err(format!("unknown result kind {other:?}")),
    }
}

// ─── Rows ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    owner_id: String,
    destination: String,
    status: String,
    created_at: String,
    updated_at: String,
    expires_at: String,
    checked_in_at: Option<String>,
    checked_out_at: Option<String>,
    notes: String,
    is_complete: bool,
}

impl TryFrom<SessionRow> for Session {
    type Error = SessionError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let id = row.id.clone();
        let corrupt = |reason: String| SessionError::Store(format!("session {id}: {reason}"));
        let ts = |s: &str| Timestamp::parse(s).map_err(|e| corrupt(e.to_string()));
        let destination: Destination =
            serde_json::from_str(&row.destination).map_err(|e| corrupt(e.to_string()))?;
        Ok(Session {
            id: SessionId::from_str(&row.id).map_err(|e| corrupt(e.to_string()))?,
            owner: OwnerId::new(row.owner_id.as_str()).map_err(|e| corrupt(e.to_string()))?,
            destination,
            status: SessionStatus::from_str(&row.status).map_err(|e| corrupt(e.to_string()))?,
            created_at: ts(&row.created_at)?,
            updated_at: ts(&row.updated_at)?,
            expires_at: ts(&row.expires_at)?,
            checked_in_at: row.checked_in_at.as_deref().map(ts).transpose()?,
            checked_out_at: row.checked_out_at.as_deref().map(ts).transpose()?,
            notes: row.notes,
            is_complete: row.is_complete,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    body: String,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    operation_id: String,
    kind: String,
    session_id: Option<String>,
    result_kind: String,
    result: String,
}

impl LedgerRow {
    fn decode(self) -> Result<(OperationId, LedgerEntry), SessionError> {
        let id = self.operation_id.clone();
        let corrupt = |reason: String| SessionError::Store(format!("operation {id}: {reason}"));
        Ok((
            OperationId::new(self.operation_id.as_str()).map_err(|e| corrupt(e.to_string()))?,
            LedgerEntry {
                kind: OperationKind::from_str(&self.kind).map_err(|e| corrupt(e.to_string()))?,
                session_id: self
                    .session_id
                    .as_deref()
                    .map(SessionId::from_str)
                    .transpose()
                    .map_err(|e| corrupt(e.to_string()))?,
                outcome: decode_outcome(&self.result_kind, &self.result).map_err(corrupt)?,
            },
        ))
    }
}

async fn upsert_session(conn: &mut SqliteConnection, session: &Session) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (id, owner_id, destination, status, created_at, updated_at,
             expires_at, checked_in_at, checked_out_at, notes, is_complete)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             updated_at = excluded.updated_at,
             checked_in_at = excluded.checked_in_at,
             checked_out_at = excluded.checked_out_at,
             notes = excluded.notes,
             is_complete = excluded.is_complete",
    )
    .bind(session.id.to_string())
    .bind(session.owner.as_str())
    .bind(to_json(&session.destination, "session destination")?)
    .bind(session.status.as_str())
    .bind(session.created_at.to_iso8601())
    .bind(session.updated_at.to_iso8601())
    .bind(session.expires_at.to_iso8601())
    .bind(session.checked_in_at.map(|t| t.to_iso8601()))
    .bind(session.checked_out_at.map(|t| t.to_iso8601()))
    .bind(&session.notes)
    .bind(session.is_complete)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_event(
    conn: &mut SqliteConnection,
    event: &SessionEvent,
    audit_sequence: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO session_events (id, session_id, event_type, audit_sequence, body)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(event.session_id.to_string())
    .bind(event.event_type.as_str())
    .bind(i64::try_from(audit_sequence).unwrap_or(i64::MAX))
    .bind(to_json(event, "session event")?)
    .execute(conn)
    .await?;
    Ok(())
}

/// The first recorded result wins; a second insert for the id is ignored.
async fn insert_ledger(
    conn: &mut SqliteConnection,
    operation_id: &OperationId,
    entry: &LedgerEntry,
    recorded_at: Timestamp,
) -> Result<(), sqlx::Error> {
    let (result_kind, result) = encode_outcome(&entry.outcome)?;
    sqlx::query(
        "INSERT INTO operation_ledger (operation_id, kind, session_id, result_kind, result, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(operation_id) DO NOTHING",
    )
    .bind(operation_id.as_str())
    .bind(entry.kind.as_str())
    .bind(entry.session_id.map(|s| s.to_string()))
    .bind(result_kind)
    .bind(result)
    .bind(recorded_at.to_iso8601())
    .execute(conn)
    .await?;
    Ok(())
}

// ─── Journals ────────────────────────────────────────────────────────

/// A durable consumer of committed events.
///
/// `record` runs inside the commit's transaction, so the journal holds a
/// row for an event exactly when the event and its audit entry are stored.
#[async_trait]
pub trait CommitJournal: Send + Sync {
    async fn record(
        &self,
        conn: &mut SqliteConnection,
        committed: &CommittedEvent,
    ) -> Result<(), sqlx::Error>;
}

// ─── Writes ──────────────────────────────────────────────────────────

/// Everything one recorded event changes, written with its audit entry.
pub(crate) struct SessionWrite {
    pub session: Session,
    pub event: SessionEvent,
    pub ledger: Option<(OperationId, LedgerEntry)>,
    pub journals: Vec<Arc<dyn CommitJournal>>,
}

#[async_trait]
impl AttachedWrite for SessionWrite {
    async fn write(
        &self,
        conn: &mut SqliteConnection,
        entry: &AuditEntry,
    ) -> Result<(), sqlx::Error> {
        upsert_session(&mut *conn, &self.session).await?;
        insert_event(&mut *conn, &self.event, entry.sequence).await?;
        if let Some((operation_id, ledger)) = &self.ledger {
            insert_ledger(&mut *conn, operation_id, ledger, entry.recorded_at).await?;
        }
        if !self.journals.is_empty() {
            let committed = CommittedEvent {
                event: self.event.clone(),
                owner: self.session.owner.clone(),
                session_status: self.session.status,
                audit_sequence: entry.sequence,
            };
            for journal in &self.journals {
                journal.record(&mut *conn, &committed).await?;
            }
        }
        Ok(())
    }
}

/// Rows read back at startup, in the order they were written.
pub(crate) struct StoredState {
    pub sessions: Vec<Session>,
    pub events: Vec<SessionEvent>,
    pub ledger: Vec<(OperationId, LedgerEntry)>,
}

// ─── Store ───────────────────────────────────────────────────────────

/// SQLite persistence for sessions, events and the operation ledger.
///
/// Cheap to clone; clones share the pool and the journal list.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    journals: Arc<RwLock<Vec<Arc<dyn CommitJournal>>>>,
}

impl SessionStore {
    /// Wrap `pool`, creating the tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, SessionError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            journals: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a journal for every event committed from now on.
    pub fn add_journal(&self, journal: Arc<dyn CommitJournal>) {
        self.journals.write().push(journal);
    }

    pub(crate) fn journals(&self) -> Vec<Arc<dyn CommitJournal>> {
        self.journals.read().clone()
    }

    /// Every stored session, event and ledger entry.
    pub(crate) async fn load(&self) -> Result<StoredState, SessionError> {
        let sessions = sqlx::query_as::<_, SessionRow>(
            "SELECT id, owner_id, destination, status, created_at, updated_at, expires_at,
                    checked_in_at, checked_out_at, notes, is_complete
             FROM sessions ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Session::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let events = sqlx::query_as::<_, EventRow>(
            "SELECT id, body FROM session_events ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            serde_json::from_str::<SessionEvent>(&row.body)
                .map_err(|e| SessionError::Store(format!("event {}: {e}", row.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;

        let ledger = sqlx::query_as::<_, LedgerRow>(
            "SELECT operation_id, kind, session_id, result_kind, result FROM operation_ledger",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerRow::decode)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(StoredState {
            sessions,
            events,
            ledger,
        })
    }

    /// Write changes that carry no audit entry: a notes edit and, for
    /// submitted operations, their ledger entry.
    pub(crate) async fn save(
        &self,
        session: Option<&Session>,
        ledger: Option<(&OperationId, &LedgerEntry)>,
        at: Timestamp,
    ) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        if let Some(session) = session {
            upsert_session(&mut *tx, session).await?;
        }
        if let Some((operation_id, entry)) = ledger {
            insert_ledger(&mut *tx, operation_id, entry, at).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{IdGenerator, RandomIds};
    use attest_geo::Coordinate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SessionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SessionStore::new(pool).await.unwrap()
    }

    fn session() -> Session {
        let t0 = Timestamp::parse("2026-03-02T09:00:00Z").unwrap();
        Session::new(
            RandomIds.session_id(),
            OwnerId::new("courier-7").unwrap(),
            Destination {
                name: "Capitol".into(),
                address: Some("1315 10th St".into()),
                coordinate: Coordinate::new(38.5816, -121.4944).unwrap(),
            },
            "bring badge".into(),
            t0,
            t0.saturating_add(chrono::Duration::minutes(15)),
        )
    }

    #[tokio::test]
    async fn session_rows_are_rewritten_in_place() {
        let store = store().await;
        let mut s = session();
        let at = s.created_at;
        store.save(Some(&s), None, at).await.unwrap();
        s.check_in(at.saturating_add(chrono::Duration::minutes(3)))
            .unwrap();
        store.save(Some(&s), None, at).await.unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.sessions, vec![s]);
        assert!(state.events.is_empty());
    }

    #[tokio::test]
    async fn ledger_keeps_the_first_result_and_restores_rejections() {
        let store = store().await;
        let s = session();
        let id = OperationId::new("op-late").unwrap();
        let rejected = LedgerEntry {
            kind: OperationKind::CheckOut,
            session_id: Some(s.id),
            outcome: Err(SessionError::InvalidState {
                session_id: s.id,
                status: SessionStatus::Active,
                operation: "check_out",
            }),
        };
        store.save(None, Some((&id, &rejected)), s.created_at).await.unwrap();
        let later = LedgerEntry {
            kind: OperationKind::CheckOut,
            session_id: Some(s.id),
            outcome: Ok(OperationResult::Session(s.clone())),
        };
        store.save(None, Some((&id, &later)), s.created_at).await.unwrap();

        let state = store.load().await.unwrap();
        assert_eq!(state.ledger.len(), 1);
        let (loaded_id, entry) = &state.ledger[0];
        assert_eq!(loaded_id, &id);
        assert_eq!(entry.kind, OperationKind::CheckOut);
        assert!(matches!(
            &entry.outcome,
            Err(SessionError::InvalidState {
                status: SessionStatus::Active,
                operation: "check_out",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn geo_rejection_survives_storage() {
        let store = store().await;
        let id = OperationId::new("op-bad-fix").unwrap();
        let entry = LedgerEntry {
            kind: OperationKind::CheckIn,
            session_id: None,
            outcome: Err(SessionError::Geo(GeoError::LatitudeOutOfRange(91.0))),
        };
        let at = Timestamp::parse("2026-03-02T09:00:00Z").unwrap();
        store.save(None, Some((&id, &entry)), at).await.unwrap();

        let state = store.load().await.unwrap();
        assert!(matches!(
            &state.ledger[0].1.outcome,
            Err(SessionError::Geo(GeoError::LatitudeOutOfRange(lat))) if *lat == 91.0
        ));
    }

    #[tokio::test]
    async fn transient_errors_are_not_recordable() {
        let store = store().await;
        let id = OperationId::new("op-flaky").unwrap();
        let entry = LedgerEntry {
            kind: OperationKind::CheckIn,
            session_id: None,
            outcome: Err(SessionError::Store("database is locked".into())),
        };
        let at = Timestamp::parse("2026-03-02T09:00:00Z").unwrap();
        assert!(store.save(None, Some((&id, &entry)), at).await.is_err());
        assert!(store.load().await.unwrap().ledger.is_empty());
    }

    #[tokio::test]
    async fn unreadable_row_is_reported() {
        let store = store().await;
        let s = session();
        store.save(Some(&s), None, s.created_at).await.unwrap();
        sqlx::query("UPDATE sessions SET status = 'wandering'")
            .execute(store.pool())
            .await
            .unwrap();
        assert!(matches!(store.load().await, Err(SessionError::Store(_))));
    }
}
