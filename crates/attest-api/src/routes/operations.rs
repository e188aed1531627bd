//! # Operation API
//!
//! `POST /v1/operations` applies a [`Submission`] at most once per
//! `operation_id`. Repeats return the recorded outcome with
//! `"replayed": true`, and a repeated business rejection returns the same
//! error. This is the endpoint a remote reconciler submits to.

use attest_core::{OperationKind, Submission};
use attest_state::AppliedOperation;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

impl Validate for Submission {
    fn validate(&self) -> Result<(), String> {
        if self.kind.requires_session() && self.session_id.is_none() {
            return Err(format!("{} requires a session_id", self.kind));
        }
        if self.kind == OperationKind::CreateSession && self.session_id.is_some() {
            return Err("create_session must not carry a session_id".to_string());
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/operations", post(apply_operation))
}

/// POST /v1/operations
async fn apply_operation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<AppliedOperation>, AppError> {
    let submission = extract_validated_json(body)?;
    if let Some(key) = headers.get(IDEMPOTENCY_KEY_HEADER) {
        let key = key
            .to_str()
            .map_err(|_| AppError::BadRequest("Idempotency-Key is not valid text".into()))?;
        if key != submission.operation_id.as_str() {
            return Err(AppError::Validation(format!(
                "Idempotency-Key {key:?} does not match operation_id {:?}",
                submission.operation_id.as_str()
            )));
        }
    }
    Ok(Json(state.engine.apply(submission).await?))
}
