//! System endpoints: health check and relay statistics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::relay::RelayStats;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /relay/stats` — Connection and room counters.
#[utoipa::path(
    get,
    path = "/relay/stats",
    tag = "System",
    summary = "Relay statistics",
    description = "Returns the number of open connections, active rooms, and members per room.",
    responses(
        (status = 200, description = "Relay counters", body = RelayStats),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> Json<RelayStats> {
    Json(state.rooms.stats().await)
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/relay/stats", get(stats_handler))
}
