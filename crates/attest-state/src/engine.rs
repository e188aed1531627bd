//! # Session Engine
//!
//! Owns every session and its events. All mutations follow one shape:
//!
//! 1. take the session's lock (the owner's lock for creation);
//! 2. load the session and check the transition against its status;
//! 3. build the new session value and its [`SessionEvent`];
//! 4. append the event to the [`AuditChain`];
//! 5. only then commit session and event to the table;
//! 6. notify observers.
//!
//! A failure at step 4 returns before anything is written, so a session can
//! never reach a status that has no audit entry behind it.
//!
//! ## Persistence
//!
//! An engine built with [`SessionEngine::restore`] keeps its sessions,
//! events and ledger in a [`SessionStore`]. Step 4 then writes the session
//! row, the event row and the ledger row in the audit entry's own
//! transaction, and startup reloads all three. An engine built with
//! [`SessionEngine::new`] keeps them in memory only.
//!
//! ## Idempotency
//!
//! [`SessionEngine::apply`] records the first terminal result for each
//! operation id: the operation result, or a validation/conflict rejection.
//! Duplicates get the recorded result back with `replayed = true`. Audit
//! and store failures are not recorded, so a retry after a transient error
//! runs the operation for real.

use std::collections::HashMap;
use std::sync::Arc;

use attest_audit::AuditChain;
use attest_core::{
    Clock, IdGenerator, OperationId, OperationKind, OwnerId, SessionId, Submission, Timestamp,
};
use attest_geo::{GeoError, LocationVerifier};
use parking_lot::RwLock;

use crate::command::{
    decode, CreateSessionInput, EndSessionInput, LocationReport, LocationReportInput,
    UpdateNotesInput,
};
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::event::{EventOutcome, SessionEvent, SessionEventType};
use crate::locks::KeyedLocks;
use crate::observer::{CommittedEvent, TransitionObserver};
use crate::outcome::{AppliedOperation, CheckOutcome, OperationResult, SessionDetails, SweepReport};
use crate::session::{Destination, Session, SessionStatus};
use crate::stats::{SessionStatistics, StatsRange};
use crate::store::{CommitJournal, LedgerEntry, SessionStore, SessionWrite};

// ─── Storage ─────────────────────────────────────────────────────────

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    events: HashMap<SessionId, Vec<SessionEvent>>,
    /// The owner's `active` or `checked_in` session.
    open_by_owner: HashMap<OwnerId, SessionId>,
    /// Creation order.
    by_owner: HashMap<OwnerId, Vec<SessionId>>,
}

impl SessionTable {
    fn put(&mut self, session: &Session) {
        if !self.sessions.contains_key(&session.id) {
            self.by_owner
                .entry(session.owner.clone())
                .or_default()
                .push(session.id);
        }
        if session.status.is_open() {
            self.open_by_owner.insert(session.owner.clone(), session.id);
        } else if self.open_by_owner.get(&session.owner) == Some(&session.id) {
            self.open_by_owner.remove(&session.owner);
        }
        self.sessions.insert(session.id, session.clone());
    }
}

/// Ledger entry for a submitted operation's successful result.
fn applied(
    origin: Option<&Submission>,
    result: impl FnOnce() -> OperationResult,
) -> Option<(OperationId, LedgerEntry)> {
    origin.map(|s| {
        (
            s.operation_id.clone(),
            LedgerEntry {
                kind: s.kind,
                session_id: s.session_id,
                outcome: Ok(result()),
            },
        )
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

// ─── Engine ──────────────────────────────────────────────────────────

pub struct SessionEngine {
    config: EngineConfig,
    verifier: LocationVerifier,
    audit: Arc<AuditChain>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    table: RwLock<SessionTable>,
    session_locks: KeyedLocks<SessionId>,
    owner_locks: KeyedLocks<OwnerId>,
    operation_locks: KeyedLocks<OperationId>,
    ledger: RwLock<HashMap<OperationId, LedgerEntry>>,
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
    store: Option<SessionStore>,
}

impl SessionEngine {
    pub fn new(
        config: EngineConfig,
        audit: Arc<AuditChain>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, GeoError> {
        let verifier = LocationVerifier::new(config.verifier)?;
        Ok(Self {
            config,
            verifier,
            audit,
            clock,
            ids,
            table: RwLock::new(SessionTable::default()),
            session_locks: KeyedLocks::new(),
            owner_locks: KeyedLocks::new(),
            operation_locks: KeyedLocks::new(),
            ledger: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            store: None,
        })
    }

    /// Build an engine over `store`, loading every stored session, event
    /// and ledger entry.
    ///
    /// Sessions that were `active` when the process stopped are swept by
    /// the next [`expire_sweep`](Self::expire_sweep) once overdue.
    pub async fn restore(
        config: EngineConfig,
        audit: Arc<AuditChain>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        store: SessionStore,
    ) -> Result<Self, SessionError> {
        let mut engine = Self::new(config, audit, clock, ids)?;
        let stored = store.load().await?;
        let (sessions, events, operations) =
            (stored.sessions.len(), stored.events.len(), stored.ledger.len());

        let table = engine.table.get_mut();
        for session in &stored.sessions {
            table.put(session);
        }
        for event in stored.events {
            table.events.entry(event.session_id).or_default().push(event);
        }
        engine.ledger.get_mut().extend(stored.ledger);
        engine.store = Some(store);

        tracing::info!(sessions, events, operations, "session state restored");
        Ok(engine)
    }

    pub fn add_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers.write().push(observer);
    }

    /// Register a journal written in each commit's transaction.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] for an engine without a session store.
    pub fn add_journal(&self, journal: Arc<dyn CommitJournal>) -> Result<(), SessionError> {
        match &self.store {
            Some(store) => {
                store.add_journal(journal);
                Ok(())
            }
            None => Err(SessionError::Store(
                "commit journals need a persistent session store".into(),
            )),
        }
    }

    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Open a session for `owner`, due for check-in within the expiry window.
    pub async fn create_session(
        &self,
        owner: OwnerId,
        destination: Destination,
        notes: Option<String>,
    ) -> Result<Session, SessionError> {
        self.create(owner, destination, notes, None).await
    }

    /// Attempt a check-in. Every attempt is recorded; the session moves to
    /// `checked_in` only when the location is granted.
    pub async fn check_in(
        &self,
        session_id: SessionId,
        report: LocationReport,
    ) -> Result<CheckOutcome, SessionError> {
        self.check(session_id, report, Direction::In, None).await
    }

    /// Attempt a check-out, with the same recording rule as check-in.
    pub async fn check_out(
        &self,
        session_id: SessionId,
        report: LocationReport,
    ) -> Result<CheckOutcome, SessionError> {
        self.check(session_id, report, Direction::Out, None).await
    }

    /// End an `active` or `checked_in` session, appending the reason to its
    /// notes.
    pub async fn end_session(
        &self,
        session_id: SessionId,
        reason: &str,
    ) -> Result<Session, SessionError> {
        self.end(session_id, reason, None).await
    }

    /// Replace the session's notes. Not a transition: no event is recorded.
    pub async fn update_notes(
        &self,
        session_id: SessionId,
        notes: String,
    ) -> Result<Session, SessionError> {
        self.notes(session_id, notes, None).await
    }

    /// Expire every `active` session whose deadline is at or before `now`.
    ///
    /// Safe to run repeatedly and concurrently: each candidate is re-checked
    /// under its lock, so a session is expired at most once.
    pub async fn expire_sweep(&self, now: Timestamp) -> SweepReport {
        let candidates: Vec<SessionId> = self
            .table
            .read()
            .sessions
            .values()
            .filter(|s| s.is_past_deadline(now))
            .map(|s| s.id)
            .collect();

        let mut report = SweepReport::default();
        for session_id in candidates {
            match self.expire_one(session_id, now).await {
                Ok(true) => report.expired.push(session_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(%session_id, error = %e, "session expiry failed, retrying next sweep");
                    report.failed += 1;
                }
            }
        }
        if !report.expired.is_empty() {
            tracing::info!(count = report.expired.len(), "expired overdue sessions");
        }
        report
    }

    /// Apply a submitted operation at most once per operation id.
    pub async fn apply(&self, submission: Submission) -> Result<AppliedOperation, SessionError> {
        let operation_id = submission.operation_id.clone();
        let _guard = self.operation_locks.lock(&operation_id).await;

        if let Some(replayed) = self.replay(&submission) {
            tracing::debug!(%operation_id, "replaying recorded operation result");
            return replayed;
        }

        // Successful results are recorded by the commit that produced them.
        let outcome = self.execute(&submission).await;
        if let Some(rejection) = outcome.as_ref().err().and_then(SessionError::replayable) {
            self.record_rejection(&submission, rejection).await;
        }
        outcome.map(|result| AppliedOperation {
            operation_id,
            replayed: false,
            result,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn session(&self, session_id: SessionId) -> Result<Session, SessionError> {
        self.load(session_id)
    }

    pub fn session_details(&self, session_id: SessionId) -> Result<SessionDetails, SessionError> {
        let table = self.table.read();
        let session = table
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(session_id))?;
        let events = table.events.get(&session_id).cloned().unwrap_or_default();
        Ok(SessionDetails { session, events })
    }

    pub fn active_session(&self, owner: &OwnerId) -> Option<Session> {
        let table = self.table.read();
        table
            .open_by_owner
            .get(owner)
            .and_then(|id| table.sessions.get(id))
            .cloned()
    }

    /// The owner's sessions, newest first.
    pub fn history(&self, owner: &OwnerId, limit: usize, offset: usize) -> Vec<Session> {
        let table = self.table.read();
        table
            .by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .filter_map(|id| table.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn statistics(&self, owner: &OwnerId, range: StatsRange) -> SessionStatistics {
        let table = self.table.read();
        let sessions = table
            .by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|id| table.sessions.get(id));
        SessionStatistics::compute(sessions, range)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn load(&self, session_id: SessionId) -> Result<Session, SessionError> {
        self.table
            .read()
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(session_id))
    }

    fn new_event(
        &self,
        session: &Session,
        event_type: SessionEventType,
        at: Timestamp,
        origin: Option<&Submission>,
    ) -> SessionEvent {
        SessionEvent {
            id: self.ids.event_id(),
            session_id: session.id,
            event_type,
            outcome: EventOutcome::Accepted,
            client_timestamp: None,
            server_timestamp: at,
            location: None,
            location_flag: None,
            distance_meters: None,
            notes: (!session.notes.is_empty()).then(|| session.notes.clone()),
            operation_id: origin.map(|s| s.operation_id.clone()),
        }
    }

    async fn create(
        &self,
        owner: OwnerId,
        destination: Destination,
        notes: Option<String>,
        origin: Option<&Submission>,
    ) -> Result<Session, SessionError> {
        if destination.name.trim().is_empty() {
            return Err(SessionError::Validation("destination name is empty".into()));
        }
        let _guard = self.owner_locks.lock(&owner).await;

        if let Some(existing) = self.table.read().open_by_owner.get(&owner) {
            return Err(SessionError::DuplicateActiveSession {
                owner,
                existing: *existing,
            });
        }

        let now = self.clock.now();
        let session = Session::new(
            self.ids.session_id(),
            owner,
            destination,
            notes.unwrap_or_default(),
            now,
            now.saturating_add(self.config.expiry_window),
        );
        let event = self.new_event(&session, SessionEventType::Created, now, origin);
        let ledger = applied(origin, || OperationResult::Session(session.clone()));
        self.commit(&session, event, ledger).await?;
        Ok(session)
    }

    async fn check(
        &self,
        session_id: SessionId,
        report: LocationReport,
        direction: Direction,
        origin: Option<&Submission>,
    ) -> Result<CheckOutcome, SessionError> {
        let _guard = self.session_locks.lock(&session_id).await;
        let now = self.clock.now();
        let mut session = self.load(session_id)?;

        let event_type = match direction {
            Direction::In => {
                session.require_state(&[SessionStatus::Active], "check_in")?;
                if session.is_past_deadline(now) {
                    return Err(SessionError::SessionExpired(session_id));
                }
                SessionEventType::CheckIn
            }
            Direction::Out => {
                session.require_state(&[SessionStatus::CheckedIn], "check_out")?;
                SessionEventType::CheckOut
            }
        };

        let verification = self
            .verifier
            .verify(&report.sample, session.destination.coordinate);
        let granted = verification.flag.is_granted();
        if granted {
            match direction {
                Direction::In => session.check_in(now)?,
                Direction::Out => session.check_out(now)?,
            }
        }

        let mut event = self.new_event(&session, event_type, now, origin);
        event.outcome = if granted {
            EventOutcome::Accepted
        } else {
            EventOutcome::Rejected
        };
        event.client_timestamp = report.client_timestamp;
        event.location = report.sample.fix().copied();
        event.location_flag = Some(verification.flag);
        event.distance_meters = verification.distance_meters;
        if report.notes.is_some() {
            event.notes = report.notes;
        }

        let outcome = if granted {
            CheckOutcome::Accepted {
                session: session.clone(),
                event: event.clone(),
            }
        } else {
            CheckOutcome::Rejected {
                session: session.clone(),
                event: event.clone(),
                flag: verification.flag,
                distance_meters: verification.distance_meters,
            }
        };
        let ledger = applied(origin, || OperationResult::Check(outcome.clone()));
        self.commit(&session, event, ledger).await?;

        if !granted {
            tracing::info!(
                %session_id,
                flag = %verification.flag,
                distance_meters = ?verification.distance_meters,
                "{} rejected",
                event_type
            );
        }
        Ok(outcome)
    }

    async fn end(
        &self,
        session_id: SessionId,
        reason: &str,
        origin: Option<&Submission>,
    ) -> Result<Session, SessionError> {
        let _guard = self.session_locks.lock(&session_id).await;
        let now = self.clock.now();
        let mut session = self.load(session_id)?;
        session.end(reason, now)?;
        let mut event = self.new_event(&session, SessionEventType::Ended, now, origin);
        event.notes = Some(reason.to_string());
        let ledger = applied(origin, || OperationResult::Session(session.clone()));
        self.commit(&session, event, ledger).await?;
        Ok(session)
    }

    async fn notes(
        &self,
        session_id: SessionId,
        notes: String,
        origin: Option<&Submission>,
    ) -> Result<Session, SessionError> {
        let _guard = self.session_locks.lock(&session_id).await;
        let mut session = self.load(session_id)?;
        session.set_notes(notes)?;
        let ledger = applied(origin, || OperationResult::Session(session.clone()));
        if let Some(store) = &self.store {
            store
                .save(
                    Some(&session),
                    ledger.as_ref().map(|(id, entry)| (id, entry)),
                    self.clock.now(),
                )
                .await?;
        }
        self.table.write().sessions.insert(session_id, session.clone());
        if let Some((operation_id, entry)) = ledger {
            self.ledger.write().insert(operation_id, entry);
        }
        Ok(session)
    }

    /// Record a business rejection for replay. A failed write is logged and
    /// the rejection is still kept for this process.
    async fn record_rejection(&self, submission: &Submission, rejection: SessionError) {
        let entry = LedgerEntry {
            kind: submission.kind,
            session_id: submission.session_id,
            outcome: Err(rejection),
        };
        if let Some(store) = &self.store {
            if let Err(e) = store
                .save(None, Some((&submission.operation_id, &entry)), self.clock.now())
                .await
            {
                tracing::warn!(
                    operation_id = %submission.operation_id,
                    error = %e,
                    "failed to persist operation rejection"
                );
            }
        }
        self.ledger
            .write()
            .insert(submission.operation_id.clone(), entry);
    }

    /// Returns whether this call performed the transition.
    async fn expire_one(&self, session_id: SessionId, now: Timestamp) -> Result<bool, SessionError> {
        let _guard = self.session_locks.lock(&session_id).await;
        let mut session = self.load(session_id)?;
        if !session.is_past_deadline(now) {
            return Ok(false);
        }
        session.expire(now)?;
        let event = self.new_event(&session, SessionEventType::Expired, now, None);
        self.commit(&session, event, None).await?;
        Ok(true)
    }

    /// Audit, then commit, then notify. Nothing is written if the audit
    /// append fails. With a store, the session, event and ledger rows are
    /// part of the audit entry's transaction.
    async fn commit(
        &self,
        session: &Session,
        event: SessionEvent,
        ledger: Option<(OperationId, LedgerEntry)>,
    ) -> Result<u64, SessionError> {
        let event_ref = event.audit_ref()?;
        let (entry, ledger) = match &self.store {
            Some(store) => {
                let write = SessionWrite {
                    session: session.clone(),
                    event: event.clone(),
                    ledger,
                    journals: store.journals(),
                };
                let entry = self.audit.append_attached(event_ref, &write).await?;
                (entry, write.ledger)
            }
            None => (self.audit.append(event_ref).await?, ledger),
        };

        {
            let mut table = self.table.write();
            table.put(session);
            table.events.entry(session.id).or_default().push(event.clone());
        }
        if let Some((operation_id, recorded)) = ledger {
            self.ledger.write().insert(operation_id, recorded);
        }

        tracing::info!(
            session_id = %session.id,
            event_type = %event.event_type,
            outcome = event.outcome.as_str(),
            status = %session.status,
            sequence = entry.sequence,
            "session event recorded"
        );

        let committed = CommittedEvent {
            event,
            owner: session.owner.clone(),
            session_status: session.status,
            audit_sequence: entry.sequence,
        };
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_commit(&committed);
        }
        Ok(entry.sequence)
    }

    fn replay(&self, submission: &Submission) -> Option<Result<AppliedOperation, SessionError>> {
        let ledger = self.ledger.read();
        let entry = ledger.get(&submission.operation_id)?;
        if entry.kind != submission.kind || entry.session_id != submission.session_id {
            return Some(Err(SessionError::OperationMismatch(
                submission.operation_id.clone(),
            )));
        }
        Some(match &entry.outcome {
            Ok(result) => Ok(AppliedOperation {
                operation_id: submission.operation_id.clone(),
                replayed: true,
                result: result.clone(),
            }),
            Err(e) => Err(e
                .replayable()
                .unwrap_or_else(|| SessionError::Validation(e.to_string()))),
        })
    }

    async fn execute(&self, submission: &Submission) -> Result<OperationResult, SessionError> {
        let origin = Some(submission);
        let payload = &submission.payload;
        match submission.kind {
            OperationKind::CreateSession => {
                let input: CreateSessionInput = decode(payload)?;
                let destination = input.destination.into_destination()?;
                self.create(input.owner_id, destination, input.notes, origin)
                    .await
                    .map(OperationResult::Session)
            }
            OperationKind::CheckIn => {
                let report = decode::<LocationReportInput>(payload)?.into_report()?;
                self.check(target(submission)?, report, Direction::In, origin)
                    .await
                    .map(OperationResult::Check)
            }
            OperationKind::CheckOut => {
                let report = decode::<LocationReportInput>(payload)?.into_report()?;
                self.check(target(submission)?, report, Direction::Out, origin)
                    .await
                    .map(OperationResult::Check)
            }
            OperationKind::EndSession => {
                let input: EndSessionInput = decode(payload)?;
                self.end(target(submission)?, input.reason(), origin)
                    .await
                    .map(OperationResult::Session)
            }
            OperationKind::UpdateNotes => {
                let input: UpdateNotesInput = decode(payload)?;
                self.notes(target(submission)?, input.notes, origin)
                    .await
                    .map(OperationResult::Session)
            }
        }
    }
}

fn target(submission: &Submission) -> Result<SessionId, SessionError> {
    submission.session_id.ok_or_else(|| {
        SessionError::Validation(format!("{} requires a session_id", submission.kind))
    })
}

// ─── Tests ───────────────────────────────────────────────────────────
