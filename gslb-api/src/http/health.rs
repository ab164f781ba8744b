//! Health check endpoints
//!
//! Liveness answers as long as the process serves HTTP; readiness follows the
//! shared `HealthState` and reports 503 until startup has finished.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use super::{AppError, AppResult, AppState};

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub cluster_identifier: String,
    pub uptime_secs: i64,
}

pub async fn readiness_check(State(state): State<AppState>) -> AppResult<Json<ReadinessResponse>> {
    if !state.health.is_ready() {
        return Err(AppError::service_unavailable("Not ready"));
    }
    Ok(Json(ReadinessResponse {
        status: "ready",
        cluster_identifier: state.cluster_identifier.to_string(),
        uptime_secs: state.health.uptime_secs(),
    }))
}
