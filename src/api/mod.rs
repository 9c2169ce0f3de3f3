//! REST API layer: route handlers, OpenAPI document and router composition.
//!
//! Document endpoints are mounted under `/api/v1`; health, relay stats and
//! docs live at the root.

pub mod docs;
pub mod handlers;

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::relay::ws_handler;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .merge(docs::docs_routes())
}

/// Builds the relay application: REST endpoints, the `/ws` upgrade route
/// and the HTTP middleware stack.
///
/// `request_timeout` bounds REST requests; upgraded WebSocket connections
/// are not affected by it.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(build_router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
