//! # API Error Types
//!
//! [`AppError`] implements `IntoResponse` with a uniform JSON body:
//!
//! ```json
//! {"error": {"code": "CONFLICT", "message": "...", "details": {...}}}
//! ```
//!
//! Domain errors map through their [`ErrorClass`]: validation to 422,
//! conflict to 409, transient to 503, and integrity to 500 with code
//! `INTEGRITY_HALT`. Messages of 500-class errors are logged, never returned.

use attest_audit::AuditError;
use attest_core::{ErrorClass, ValidationError};
use attest_queue::QueueError;
use attest_state::SessionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `NOT_FOUND` or `INTEGRITY_HALT`.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// 404.
    #[error("{0}")]
    NotFound(String),

    /// 422: the body parsed but its content is invalid.
    #[error("{0}")]
    Validation(String),

    /// 400: the request could not be read.
    #[error("{0}")]
    BadRequest(String),

    /// 409, with optional structured details.
    #[error("{message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// 503: retry later.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// 500 `INTEGRITY_HALT`: the audit chain failed verification and
    /// transitions are suspended.
    #[error("{0}")]
    IntegrityHalt(String),

    /// 500.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            details: None,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::IntegrityHalt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_HALT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Map a domain error by class. `message` is what a client may see.
    fn from_class(class: ErrorClass, message: String) -> Self {
        match class {
            ErrorClass::Validation => Self::Validation(message),
            ErrorClass::Conflict => Self::conflict(message),
            ErrorClass::Transient => Self::ServiceUnavailable(message),
            ErrorClass::Integrity => Self::IntegrityHalt(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::IntegrityHalt(_) => {
                "Audit chain integrity check failed; transitions are suspended".to_string()
            }
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::IntegrityHalt(_) => tracing::error!(error = %self, "request refused: integrity halt"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let details = match self {
            Self::Conflict { details, .. } => details,
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match &err {
            SessionError::SessionNotFound(_) => Self::NotFound(err.to_string()),
            SessionError::DuplicateActiveSession { existing, .. } => Self::Conflict {
                message: err.to_string(),
                details: Some(serde_json::json!({ "existing_session_id": existing })),
            },
            _ => Self::from_class(err.class(), err.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match &err {
            QueueError::NotFound(_) => Self::NotFound(err.to_string()),
            _ => Self::from_class(err.class(), err.to_string()),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        Self::from_class(err.class(), err.to_string())
    }
}
