//! # attest-api: HTTP Service for GPS-Verified Attendance
//!
//! ## API Surface
//!
//! | Prefix | Module | Purpose |
//! |---|---|---|
//! | `/v1/sessions/*` | [`routes::sessions`] | Session lifecycle |
//! | `/v1/owners/*` | [`routes::owners`] | History, statistics, queue clearing |
//! | `/v1/operations` | [`routes::operations`] | Idempotent apply |
//! | `/v1/queue/*` | [`routes::queue`] | Offline queue and dead letters |
//! | `/v1/audit/*` | [`routes::audit`] | Hash-chain reads and verification |
//! | `/health/*` | here | Liveness and readiness checks |
//!
//! Every error body is `{"error":{"code","message","details?"}}`; see
//! [`error::AppError`].

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .merge(routes::sessions::router())
        .merge(routes::owners::router())
        .merge(routes::operations::router())
        .merge(routes::queue::router())
        .merge(routes::audit::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check: 200 while the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness check: 503 while the audit chain is halted.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.engine.audit().is_halted() {
        (StatusCode::SERVICE_UNAVAILABLE, "halted")
    } else {
        (StatusCode::OK, "ready")
    }
}
