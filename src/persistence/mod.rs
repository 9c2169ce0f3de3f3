//! Persistence collaborator contract.
//!
//! The client core never stores documents itself: it talks to a
//! [`DocumentStore`] that enforces optimistic concurrency on
//! `edit_version` and owns checkpoint history. [`InMemoryDocumentStore`]
//! is the reference implementation backing the relay's REST API, and
//! [`HttpDocumentStore`] is the client for that API.

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    ConflictDetails, Contribution, Document, DocumentId, UserId, VersionMeta, VersionRecord,
};

pub use http::HttpDocumentStore;
pub use memory::InMemoryDocumentStore;

/// Failure classes reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The expected version no longer matches the stored one.
    #[error("edit conflict: server is at version {}", .0.current_version)]
    Conflict(Box<ConflictDetails>),

    /// Checkpoint content is identical to the latest checkpoint.
    #[error("no changes since the latest checkpoint")]
    NoChanges,

    /// No document with the given ID.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// No checkpoint with the given number.
    #[error("version {0} not found")]
    VersionNotFound(u32),

    /// The request was rejected as invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other failure (transport, server error, undecodable response).
    #[error("request failed: {0}")]
    Request(String),
}

/// Request body for creating a document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewDocument {
    /// Title of the new document.
    pub title: String,
    /// Initial content.
    #[serde(default)]
    pub content: String,
    /// Creator.
    #[serde(default)]
    pub author: Option<UserId>,
}

/// A versioned save: content plus the version the writer believes current.
///
/// `expected_version: None` skips the concurrency check (force save).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentUpdate {
    /// Full new content.
    pub content: String,
    /// Version the writer believes is current.
    #[serde(default)]
    pub expected_version: Option<u64>,
    /// Writer.
    #[serde(default)]
    pub author: Option<UserId>,
}

/// Request body for creating a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckpointRequest {
    /// Summary stored with the checkpoint.
    #[serde(default)]
    pub change_summary: Option<String>,
    /// Author.
    #[serde(default)]
    pub author: Option<UserId>,
}

/// Request body for reverting to a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevertRequest {
    /// Checkpoint to restore.
    pub version_number: u32,
    /// User performing the revert.
    #[serde(default)]
    pub author: Option<UserId>,
}

/// Durable storage the sync core depends on.
///
/// Implementations must reject an update whose `expected_version` differs
/// from the stored version with [`StoreError::Conflict`], and a checkpoint
/// whose content equals the latest checkpoint with [`StoreError::NoChanges`]
/// without persisting anything.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug + 'static {
    /// Fetches a document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] or [`StoreError::Request`].
    async fn get(&self, document_id: DocumentId) -> Result<Document, StoreError>;

    /// Writes new content, checking `expected_version` when present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a version mismatch.
    async fn update(
        &self,
        document_id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, StoreError>;

    /// Creates a checkpoint of the stored content.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoChanges`] if the content equals the latest
    /// checkpoint.
    async fn create_version(
        &self,
        document_id: DocumentId,
        request: CheckpointRequest,
    ) -> Result<VersionRecord, StoreError>;

    /// Restores the content of a checkpoint and returns the full document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionNotFound`] if the checkpoint is unknown.
    async fn revert(
        &self,
        document_id: DocumentId,
        request: RevertRequest,
    ) -> Result<Document, StoreError>;

    /// Lists checkpoint metadata, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] or [`StoreError::Request`].
    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>, StoreError>;

    /// Aggregates per-user contribution statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DocumentNotFound`] or [`StoreError::Request`].
    async fn contributions(&self, document_id: DocumentId)
    -> Result<Vec<Contribution>, StoreError>;
}
