//! OpenAPI document for the relay's REST surface, served by Swagger UI at
//! `/docs` when the `swagger-ui` feature is enabled.

use axum::Router;
use utoipa::OpenApi;

use crate::api::handlers::system::HealthResponse;
use crate::app_state::AppState;
use crate::domain::{ConflictDetails, Contribution, Document, VersionMeta, VersionRecord};
use crate::error::{ErrorBody, ErrorResponse};
use crate::persistence::{CheckpointRequest, DocumentUpdate, NewDocument, RevertRequest};
use crate::relay::RelayStats;

/// OpenAPI description of the relay REST API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "Collab Sync Relay API",
        description = "Document storage with optimistic concurrency, checkpoints and relay statistics.

Live editing traffic uses the WebSocket endpoint `GET /ws?token=...`, which is not described here."
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        crate::api::handlers::documents::create_document,
        crate::api::handlers::documents::get_document,
        crate::api::handlers::documents::update_document,
        crate::api::handlers::documents::list_versions,
        crate::api::handlers::documents::create_version,
        crate::api::handlers::documents::revert_document,
        crate::api::handlers::documents::contributions,
        crate::api::handlers::system::health_handler,
        crate::api::handlers::system::stats_handler,
    ),
    components(
        schemas(
            Document,
            NewDocument,
            DocumentUpdate,
            CheckpointRequest,
            RevertRequest,
            VersionRecord,
            VersionMeta,
            Contribution,
            ConflictDetails,
            ErrorResponse,
            ErrorBody,
            HealthResponse,
            RelayStats,
        )
    ),
    tags(
        (name = "Documents", description = "Document content and statistics"),
        (name = "Versions", description = "Checkpoints and revert"),
        (name = "System", description = "Health and relay counters"),
    )
)]
pub struct ApiDoc;

/// Documentation routes: Swagger UI at `/docs`, OpenAPI JSON at `/api/openapi.json`.
#[cfg(feature = "swagger-ui")]
pub fn docs_routes() -> Router<AppState> {
    use utoipa_swagger_ui::SwaggerUi;

    Router::new().merge(SwaggerUi::new("/docs").url("/api/openapi.json", ApiDoc::openapi()))
}

/// Documentation routes: only the OpenAPI JSON at `/api/openapi.json`.
#[cfg(not(feature = "swagger-ui"))]
pub fn docs_routes() -> Router<AppState> {
    use axum::Json;
    use axum::routing::get;

    Router::new().route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_document_route_is_described() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/documents",
            "/api/v1/documents/{id}",
            "/api/v1/documents/{id}/versions",
            "/api/v1/documents/{id}/revert",
            "/api/v1/documents/{id}/contributions",
            "/relay/stats",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
