//! # Audit API
//!
//! Read access to the hash chain, on-demand verification, and the operator
//! acknowledgement that lifts an integrity halt.

use attest_audit::{AuditEntry, ChainVerification, IntegrityBreach};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// Entries returned by one range read.
const MAX_RANGE: u64 = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit/entries", get(entries))
        .route("/v1/audit/verify", get(verify))
        .route("/v1/audit/status", get(status))
        .route("/v1/audit/acknowledge", post(acknowledge))
}

/// Inclusive sequence range.
#[derive(Debug, Default, Deserialize)]
struct RangeParams {
    from: Option<u64>,
    to: Option<u64>,
}

impl RangeParams {
    fn bounds(&self, cap: Option<u64>) -> Result<(u64, u64), AppError> {
        let from = self.from.unwrap_or(0);
        let mut to = self.to.unwrap_or(u64::MAX);
        if from > to {
            return Err(AppError::Validation("from must not be after to".into()));
        }
        if let Some(cap) = cap {
            to = to.min(from.saturating_add(cap - 1));
        }
        Ok((from, to))
    }
}

/// GET /v1/audit/entries?from=&to=, at most 1000 per call.
async fn entries(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let (from, to) = params.bounds(Some(MAX_RANGE))?;
    Ok(Json(state.engine.audit().entries(from, to).await?))
}

/// GET /v1/audit/verify?from=&to=. A break halts the chain.
async fn verify(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<ChainVerification>, AppError> {
    let (from, to) = params.bounds(None)?;
    Ok(Json(state.engine.audit().verify(from, to).await?))
}

#[derive(Debug, Serialize)]
struct ChainStatus {
    halted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    breach: Option<IntegrityBreach>,
    head_sequence: Option<u64>,
}

/// GET /v1/audit/status
async fn status(State(state): State<AppState>) -> Result<Json<ChainStatus>, AppError> {
    let audit = state.engine.audit();
    let breach = audit.breach();
    Ok(Json(ChainStatus {
        halted: breach.is_some(),
        breach,
        head_sequence: audit.head_sequence().await?,
    }))
}

#[derive(Debug, Serialize)]
struct Acknowledged {
    /// The breach that was cleared, if the chain was halted.
    cleared: Option<IntegrityBreach>,
}

/// POST /v1/audit/acknowledge
async fn acknowledge(State(state): State<AppState>) -> Json<Acknowledged> {
    let cleared = state.engine.audit().acknowledge_investigation().await;
    Json(Acknowledged { cleared })
}
