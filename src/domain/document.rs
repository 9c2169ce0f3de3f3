//! Document, checkpoint and contribution records exchanged with the
//! persistence collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{DocumentId, UserId};

/// A document as stored by the persistence collaborator.
///
/// `edit_version` is the optimistic-concurrency token: it starts at 1 and is
/// bumped by every accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Document {
    /// Document identifier.
    pub id: DocumentId,
    /// Human-readable title.
    pub title: String,
    /// Full document content.
    pub content: String,
    /// Current edit version.
    pub edit_version: u64,
    /// User that performed the last content change.
    #[serde(default)]
    pub last_edited_by: Option<UserId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last write.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a fresh document at edit version 1.
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            title: title.into(),
            content: content.into(),
            edit_version: 1,
            last_edited_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A durable, immutable checkpoint of a document's full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VersionRecord {
    /// Row identifier of the checkpoint.
    pub id: uuid::Uuid,
    /// Document the checkpoint belongs to.
    pub document_id: DocumentId,
    /// Sequential checkpoint number, starting at 1 per document.
    pub version_number: u32,
    /// Document title at checkpoint time.
    pub title: String,
    /// Full content snapshot.
    pub content: String,
    /// Author of the checkpoint.
    #[serde(default)]
    pub created_by: Option<UserId>,
    /// Free-form summary supplied by the author.
    pub change_summary: String,
    /// Whitespace-separated word count of `content`.
    pub word_count: usize,
    /// Character count of `content`.
    pub character_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Checkpoint metadata without the content, as returned by history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VersionMeta {
    /// Row identifier of the checkpoint.
    pub id: uuid::Uuid,
    /// Sequential checkpoint number.
    pub version_number: u32,
    /// Document title at checkpoint time.
    pub title: String,
    /// Author of the checkpoint.
    #[serde(default)]
    pub created_by: Option<UserId>,
    /// Free-form summary supplied by the author.
    pub change_summary: String,
    /// Word count of the snapshot.
    pub word_count: usize,
    /// Character count of the snapshot.
    pub character_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&VersionRecord> for VersionMeta {
    fn from(record: &VersionRecord) -> Self {
        Self {
            id: record.id,
            version_number: record.version_number,
            title: record.title.clone(),
            created_by: record.created_by.clone(),
            change_summary: record.change_summary.clone(),
            word_count: record.word_count,
            character_count: record.character_count,
            created_at: record.created_at,
        }
    }
}

/// Per-user aggregate statistics for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Contribution {
    /// Contributor.
    pub user_id: UserId,
    /// Number of content-changing writes by this user.
    pub total_changes: u64,
    /// Characters inserted by this user.
    pub characters_added: u64,
    /// Characters removed by this user.
    pub characters_removed: u64,
    /// Checkpoints created by this user.
    pub versions_created: u64,
    /// Share of all tracked activity (changes plus checkpoints), in percent.
    pub percentage: f64,
}

/// Server-side state reported when a save's expected version is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConflictDetails {
    /// Version the client believed was current.
    #[serde(default)]
    pub expected_version: Option<u64>,
    /// Version actually stored.
    pub current_version: u64,
    /// Content actually stored.
    pub server_content: String,
    /// User that produced the stored version.
    #[serde(default)]
    pub last_edited_by: Option<UserId>,
}
