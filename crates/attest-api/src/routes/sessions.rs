//! # Session API
//!
//! Direct, non-queued session operations. Check-in and check-out always
//! answer 200 when the attempt was recorded; the body's `outcome` says
//! whether the location was accepted.

use attest_core::SessionId;
use attest_state::{
    CheckOutcome, CreateSessionInput, EndSessionInput, LocationReportInput, Session,
    SessionDetails, UpdateNotesInput,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::error::AppError;
use crate::extractors::{
    extract_json, extract_optional_json, extract_validated_json, parse_id, Validate,
};
use crate::state::AppState;

const MAX_NOTES_LEN: usize = 4000;

impl Validate for CreateSessionInput {
    fn validate(&self) -> Result<(), String> {
        if self.destination.name.trim().is_empty() {
            return Err("destination.name must not be empty".to_string());
        }
        if self.destination.name.len() > 255 {
            return Err("destination.name must not exceed 255 characters".to_string());
        }
        if self.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(format!("notes must not exceed {MAX_NOTES_LEN} characters"));
        }
        Ok(())
    }
}

impl Validate for UpdateNotesInput {
    fn validate(&self) -> Result<(), String> {
        if self.notes.len() > MAX_NOTES_LEN {
            return Err(format!("notes must not exceed {MAX_NOTES_LEN} characters"));
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/{id}", get(get_session))
        .route("/v1/sessions/{id}/check-in", post(check_in))
        .route("/v1/sessions/{id}/check-out", post(check_out))
        .route("/v1/sessions/{id}/end", post(end_session))
        .route("/v1/sessions/{id}/notes", put(update_notes))
}

/// POST /v1/sessions
async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let req = extract_validated_json(body)?;
    let destination = req.destination.into_destination()?;
    let session = state
        .engine
        .create_session(req.owner_id, destination, req.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /v1/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetails>, AppError> {
    let id: SessionId = parse_id(&id)?;
    Ok(Json(state.engine.session_details(id)?))
}

/// POST /v1/sessions/{id}/check-in
async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<LocationReportInput>, JsonRejection>,
) -> Result<Json<CheckOutcome>, AppError> {
    let id: SessionId = parse_id(&id)?;
    let report = extract_json(body)?.into_report()?;
    Ok(Json(state.engine.check_in(id, report).await?))
}

/// POST /v1/sessions/{id}/check-out
async fn check_out(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<LocationReportInput>, JsonRejection>,
) -> Result<Json<CheckOutcome>, AppError> {
    let id: SessionId = parse_id(&id)?;
    let report = extract_json(body)?.into_report()?;
    Ok(Json(state.engine.check_out(id, report).await?))
}

/// POST /v1/sessions/{id}/end. The body, and its `reason`, are optional.
async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<EndSessionInput>, JsonRejection>,
) -> Result<Json<Session>, AppError> {
    let id: SessionId = parse_id(&id)?;
    let req: EndSessionInput = extract_optional_json(body)?;
    Ok(Json(state.engine.end_session(id, req.reason()).await?))
}

/// PUT /v1/sessions/{id}/notes
async fn update_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateNotesInput>, JsonRejection>,
) -> Result<Json<Session>, AppError> {
    let id: SessionId = parse_id(&id)?;
    let req = extract_validated_json(body)?;
    Ok(Json(state.engine.update_notes(id, req.notes).await?))
}
