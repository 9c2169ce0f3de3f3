//! Error types for the client core and the relay's REST surface.
//!
//! [`SyncError`] is the taxonomy surfaced to callers of the client core.
//! [`ApiError`] is the relay's REST error: each variant maps to a specific
//! HTTP status code and a structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{ConflictDetails, DocumentId};
use crate::persistence::StoreError;

/// Errors surfaced by the client core.
///
/// Transport failures are absorbed by the connection manager up to the
/// retry cap and only reach callers as lifecycle events; persistence
/// failures always reach the original caller and never discard unsaved
/// local content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The channel could not be established or dropped unexpectedly.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The connection was closed permanently on request.
    #[error("connection permanently closed")]
    PermanentDisconnect,

    /// A save carried a stale expected version.
    #[error("save conflict: expected version {expected:?}, server has {current}")]
    SaveConflict {
        /// Version the client believed current.
        expected: Option<u64>,
        /// Version the server stores.
        current: u64,
    },

    /// A checkpoint was requested with content identical to the latest one.
    #[error("no changes since the latest checkpoint")]
    NoChanges,

    /// The document does not exist on the server.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// The requested checkpoint does not exist.
    #[error("version {0} not found")]
    VersionNotFound(u32),

    /// Any other persistence failure.
    #[error("request failed: {0}")]
    Request(String),

    /// The operation needs an active document and none is selected.
    #[error("no active document")]
    NoActiveDocument,

    /// The save/conflict state machine rejected the requested step.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// Attempted step.
        action: &'static str,
        /// State the machine was in.
        state: &'static str,
    },

    /// The client actor is no longer running.
    #[error("sync client stopped")]
    ClientStopped,
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(details) => Self::SaveConflict {
                expected: details.expected_version,
                current: details.current_version,
            },
            StoreError::NoChanges => Self::NoChanges,
            StoreError::DocumentNotFound(id) => Self::DocumentNotFound(id),
            StoreError::VersionNotFound(n) => Self::VersionNotFound(n),
            StoreError::InvalidRequest(msg) | StoreError::Request(msg) => Self::Request(msg),
        }
    }
}

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2003,
///     "message": "edit conflict: expected version 3, current 4",
///     "conflict": { "current_version": 4, "server_content": "..." }
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`ApiError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Server state for edit conflicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDetails>,
}

/// Relay REST error with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                          |
/// |-----------|-----------------|--------------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request                      |
/// | 2000–2999 | State/Not Found | 404 / 409 Conflict / 422 Unprocessable |
/// | 3000–3999 | Server          | 500 Internal Server Error            |
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Document with the given ID was not found.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Checkpoint with the given number was not found.
    #[error("version {0} not found")]
    VersionNotFound(u32),

    /// The update's expected version is stale.
    #[error(
        "edit conflict: expected version {:?}, current {}",
        .0.expected_version,
        .0.current_version
    )]
    EditConflict(Box<ConflictDetails>),

    /// Checkpoint content is identical to the latest checkpoint.
    #[error("no changes detected; content is identical to the latest version")]
    NoChanges,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Error code reported for [`ApiError::NoChanges`].
    pub const NO_CHANGES_CODE: u32 = 2004;

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::DocumentNotFound(_) => 2001,
            Self::VersionNotFound(_) => 2002,
            Self::EditConflict(_) => 2003,
            Self::NoChanges => Self::NO_CHANGES_CODE,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DocumentNotFound(_) | Self::VersionNotFound(_) => StatusCode::NOT_FOUND,
            Self::EditConflict(_) => StatusCode::CONFLICT,
            Self::NoChanges => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(details) => Self::EditConflict(details),
            StoreError::NoChanges => Self::NoChanges,
            StoreError::DocumentNotFound(id) => Self::DocumentNotFound(id),
            StoreError::VersionNotFound(n) => Self::VersionNotFound(n),
            StoreError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            StoreError::Request(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();
        let conflict = match self {
            Self::EditConflict(details) => Some(*details),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                details: None,
                conflict,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> Box<ConflictDetails> {
        Box::new(ConflictDetails {
            expected_version: Some(2),
            current_version: 3,
            server_content: "server".to_string(),
            last_edited_by: None,
        })
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = ApiError::from(StoreError::Conflict(conflict()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), 2003);
        assert!(err.to_string().contains("current 3"));
    }

    #[test]
    fn no_changes_maps_to_422() {
        let err = ApiError::from(StoreError::NoChanges);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), ApiError::NO_CHANGES_CODE);
    }

    #[test]
    fn store_conflict_becomes_sync_conflict() {
        let err = SyncError::from(StoreError::Conflict(conflict()));
        assert_eq!(
            err,
            SyncError::SaveConflict {
                expected: Some(2),
                current: 3
            }
        );
    }

    #[test]
    fn request_failures_stay_generic() {
        let err = SyncError::from(StoreError::Request("timeout".to_string()));
        assert_eq!(err, SyncError::Request("timeout".to_string()));
    }
}
