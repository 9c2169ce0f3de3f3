//! Document handlers: CRUD, checkpoints, revert and contribution stats.
//!
//! Successful writes are announced to the document's room as
//! `document_updated` frames so that connected clients can adopt the new
//! version.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{Contribution, Document, DocumentId, UserId, VersionMeta, VersionRecord};
use crate::error::{ApiError, ErrorResponse};
use crate::persistence::{
    CheckpointRequest, DocumentStore, DocumentUpdate, NewDocument, RevertRequest,
};
use crate::protocol::ServerFrame;
use crate::relay::RoomEvent;

/// `POST /documents` — Create a document.
///
/// # Errors
///
/// Returns [`ApiError::InvalidRequest`] if the title is blank.
#[utoipa::path(
    post,
    path = "/api/v1/documents",
    tag = "Documents",
    summary = "Create a document",
    request_body = NewDocument,
    responses(
        (status = 201, description = "Document created", body = Document),
        (status = 400, description = "Blank title", body = ErrorResponse),
    )
)]
pub async fn create_document(
    State(state): State<AppState>,
    Json(req): Json<NewDocument>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::InvalidRequest("title must not be empty".to_string()));
    }
    let document = state.store.create(req).await;
    tracing::info!(document_id = %document.id, "document created");
    Ok((StatusCode::CREATED, Json(document)))
}

/// `GET /documents/{id}` — Fetch a document.
///
/// # Errors
///
/// Returns [`ApiError::DocumentNotFound`] if the document does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}",
    tag = "Documents",
    summary = "Get a document",
    params(("id" = DocumentId, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document", body = Document),
        (status = 404, description = "Document not found", body = ErrorResponse),
    )
)]
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(state.store.get(id).await?))
}

/// `PUT /documents/{id}` — Save new content with an optimistic version check.
///
/// # Errors
///
/// Returns [`ApiError::EditConflict`] carrying the server state when
/// `expected_version` is stale.
#[utoipa::path(
    put,
    path = "/api/v1/documents/{id}",
    tag = "Documents",
    summary = "Update document content",
    description = "Writes the full content. When `expected_version` is present it must equal the stored `edit_version`; otherwise the write is rejected with 409 and the server's content.",
    params(("id" = DocumentId, Path, description = "Document ID")),
    request_body = DocumentUpdate,
    responses(
        (status = 200, description = "Document after the write", body = Document),
        (status = 404, description = "Document not found", body = ErrorResponse),
        (status = 409, description = "Stale expected version", body = ErrorResponse),
    )
)]
pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
    Json(update): Json<DocumentUpdate>,
) -> Result<Json<Document>, ApiError> {
    let author = update.author.clone();
    let document = state.store.update(id, update).await?;
    announce(&state, &document, author);
    Ok(Json(document))
}

/// `GET /documents/{id}/versions` — List checkpoints, newest first.
///
/// # Errors
///
/// Returns [`ApiError::DocumentNotFound`] if the document does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/versions",
    tag = "Versions",
    summary = "List checkpoints",
    params(("id" = DocumentId, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Checkpoint metadata", body = Vec<VersionMeta>),
        (status = 404, description = "Document not found", body = ErrorResponse),
    )
)]
pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
) -> Result<Json<Vec<VersionMeta>>, ApiError> {
    Ok(Json(state.store.list_versions(id).await?))
}

/// `POST /documents/{id}/versions` — Checkpoint the stored content.
///
/// # Errors
///
/// Returns [`ApiError::NoChanges`] if the content equals the latest
/// checkpoint.
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/versions",
    tag = "Versions",
    summary = "Create a checkpoint",
    params(("id" = DocumentId, Path, description = "Document ID")),
    request_body = CheckpointRequest,
    responses(
        (status = 201, description = "Checkpoint created", body = VersionRecord),
        (status = 404, description = "Document not found", body = ErrorResponse),
        (status = 422, description = "No changes since the latest checkpoint", body = ErrorResponse),
    )
)]
pub async fn create_version(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
    Json(req): Json<CheckpointRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.store.create_version(id, req).await?;
    tracing::info!(document_id = %id, version_number = record.version_number, "checkpoint created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /documents/{id}/revert` — Restore a checkpoint.
///
/// # Errors
///
/// Returns [`ApiError::VersionNotFound`] if the checkpoint does not exist.
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/revert",
    tag = "Versions",
    summary = "Revert to a checkpoint",
    params(("id" = DocumentId, Path, description = "Document ID")),
    request_body = RevertRequest,
    responses(
        (status = 200, description = "Document after the revert", body = Document),
        (status = 404, description = "Document or checkpoint not found", body = ErrorResponse),
    )
)]
pub async fn revert_document(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
    Json(req): Json<RevertRequest>,
) -> Result<Json<Document>, ApiError> {
    let author = req.author.clone();
    let version_number = req.version_number;
    let document = state.store.revert(id, req).await?;
    tracing::info!(document_id = %id, version_number, "document reverted");
    announce(&state, &document, author);
    Ok(Json(document))
}

/// `GET /documents/{id}/contributions` — Per-user edit statistics.
///
/// # Errors
///
/// Returns [`ApiError::DocumentNotFound`] if the document does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/contributions",
    tag = "Documents",
    summary = "Contribution statistics",
    params(("id" = DocumentId, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Contributions per user", body = Vec<Contribution>),
        (status = 404, description = "Document not found", body = ErrorResponse),
    )
)]
pub async fn contributions(
    State(state): State<AppState>,
    Path(id): Path<DocumentId>,
) -> Result<Json<Vec<Contribution>>, ApiError> {
    Ok(Json(state.store.contributions(id).await?))
}

fn announce(state: &AppState, document: &Document, author: Option<UserId>) {
    let frame = ServerFrame::DocumentUpdated {
        document_id: document.id,
        user_id: author.clone(),
        version: document.edit_version,
        content: Some(document.content.clone()),
    };
    let delivered = state
        .room_events
        .publish(RoomEvent::from_user(document.id, author, frame));
    tracing::debug!(document_id = %document.id, delivered, "document_updated published");
}

/// Document routes (nested under `/api/v1`).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents", post(create_document))
        .route("/documents/{id}", get(get_document).put(update_document))
        .route(
            "/documents/{id}/versions",
            get(list_versions).post(create_version),
        )
        .route("/documents/{id}/revert", post(revert_document))
        .route("/documents/{id}/contributions", get(contributions))
}
