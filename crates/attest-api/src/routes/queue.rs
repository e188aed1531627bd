//! # Queue API
//!
//! Enqueue, inspection, manual retry and manual override of the durable
//! operation queue, and an on-demand drain.

use attest_core::OperationId;
use attest_queue::{NewOperation, OperationStatus, QueueStats, QueuedOperation};
use attest_sync::DrainReport;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, PaginationParams, Validate};
use crate::state::AppState;

impl Validate for NewOperation {
    fn validate(&self) -> Result<(), String> {
        if self.submission.kind.requires_session() && self.submission.session_id.is_none() {
            return Err(format!("{} requires a session_id", self.submission.kind));
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be positive".to_string());
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/queue", post(enqueue))
        .route("/v1/queue/pending", get(list_pending))
        .route("/v1/queue/dead-letters", get(list_dead_letters))
        .route("/v1/queue/dead-letters/{id}/retry", post(retry_dead_letter))
        .route("/v1/queue/operations/{id}", get(get_operation))
        .route("/v1/queue/operations/{id}/succeed", post(mark_succeeded))
        .route("/v1/queue/stats", get(stats))
        .route("/v1/queue/drain", post(drain))
}

/// POST /v1/queue
async fn enqueue(
    State(state): State<AppState>,
    body: Result<Json<NewOperation>, JsonRejection>,
) -> Result<(StatusCode, Json<QueuedOperation>), AppError> {
    let op = extract_validated_json(body)?;
    let queued = state.queue.enqueue(op).await?;
    Ok((StatusCode::CREATED, Json(queued)))
}

/// GET /v1/queue/pending?limit=, in dequeue order.
async fn list_pending(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Vec<QueuedOperation>>, AppError> {
    Ok(Json(state.queue.list_pending(page.effective_limit()).await?))
}

/// GET /v1/queue/dead-letters?limit=, most recent first.
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Vec<QueuedOperation>>, AppError> {
    Ok(Json(
        state
            .queue
            .list_dead_lettered(page.effective_limit())
            .await?,
    ))
}

/// POST /v1/queue/dead-letters/{id}/retry
async fn retry_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueuedOperation>, AppError> {
    let id: OperationId = parse_id(&id)?;
    Ok(Json(state.queue.requeue_dead_letter(&id).await?))
}

#[derive(Debug, Serialize)]
struct OperationView {
    operation_id: OperationId,
    status: OperationStatus,
    /// Absent once the operation has succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<QueuedOperation>,
}

/// GET /v1/queue/operations/{id}
async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationView>, AppError> {
    let id: OperationId = parse_id(&id)?;
    let operation = state.queue.get(&id).await?;
    let status = match &operation {
        Some(op) => op.status,
        None => state
            .queue
            .status(&id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {id} not found")))?,
    };
    Ok(Json(OperationView {
        operation_id: id,
        status,
        operation,
    }))
}

/// POST /v1/queue/operations/{id}/succeed: operator override marking an
/// operation completed without submitting it.
async fn mark_succeeded(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationView>, AppError> {
    let id: OperationId = parse_id(&id)?;
    if state.queue.mark_succeeded(&id).await? {
        tracing::info!(operation_id = %id, "operation marked succeeded by operator");
    }
    Ok(Json(OperationView {
        operation_id: id,
        status: OperationStatus::Succeeded,
        operation: None,
    }))
}

/// GET /v1/queue/stats
async fn stats(State(state): State<AppState>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.queue.stats().await?))
}

/// POST /v1/queue/drain: run one reconciliation pass now.
async fn drain(State(state): State<AppState>) -> Result<Json<DrainReport>, AppError> {
    Ok(Json(state.reconciler.drain_once().await?))
}
