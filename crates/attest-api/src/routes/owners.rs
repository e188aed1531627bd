//! # Owner API
//!
//! Per-owner views: session history, the open session, statistics, and
//! clearing the owner's pending queue.

use attest_core::{OwnerId, Timestamp};
use attest_state::{Session, SessionStatistics, StatsRange};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extractors::PaginationParams;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/owners/{owner}/sessions", get(history))
        .route("/v1/owners/{owner}/sessions/active", get(active_session))
        .route("/v1/owners/{owner}/statistics", get(statistics))
        .route("/v1/owners/{owner}/queue", delete(clear_queue))
}

fn owner(raw: String) -> Result<OwnerId, AppError> {
    Ok(OwnerId::new(raw)?)
}

/// GET /v1/owners/{owner}/sessions?limit=&offset=, newest first.
async fn history(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Vec<Session>>, AppError> {
    let owner = owner(raw)?;
    Ok(Json(state.engine.history(
        &owner,
        page.effective_limit(),
        page.effective_offset(),
    )))
}

/// GET /v1/owners/{owner}/sessions/active
async fn active_session(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Session>, AppError> {
    let owner = owner(raw)?;
    state
        .engine
        .active_session(&owner)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("owner {owner} has no open session")))
}

/// Creation-time window, RFC 3339 or epoch seconds, both ends inclusive.
#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    start: Option<String>,
    end: Option<String>,
}

impl RangeParams {
    fn into_range(self) -> Result<StatsRange, AppError> {
        let parse = |raw: Option<String>| -> Result<Option<Timestamp>, AppError> {
            raw.map(|s| Timestamp::parse_client(&s)).transpose().map_err(AppError::from)
        };
        let range = StatsRange {
            start: parse(self.start)?,
            end: parse(self.end)?,
        };
        if let (Some(s), Some(e)) = (range.start, range.end) {
            if s > e {
                return Err(AppError::Validation("start must not be after end".into()));
            }
        }
        Ok(range)
    }
}

/// GET /v1/owners/{owner}/statistics?start=&end=
async fn statistics(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<SessionStatistics>, AppError> {
    let owner = owner(raw)?;
    let range = params.into_range()?;
    Ok(Json(state.engine.statistics(&owner, range)))
}

#[derive(Debug, Serialize)]
struct ClearedQueue {
    owner_id: OwnerId,
    removed: u64,
}

/// DELETE /v1/owners/{owner}/queue. Leased operations are left to finish.
async fn clear_queue(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<ClearedQueue>, AppError> {
    let owner = owner(raw)?;
    let removed = state.queue.clear_owner(&owner).await?;
    Ok(Json(ClearedQueue {
        owner_id: owner,
        removed,
    }))
}
