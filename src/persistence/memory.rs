//! In-memory reference implementation of [`DocumentStore`].
//!
//! Documents live in a `RwLock<HashMap<...>>`, following the same shape as
//! the relay's room registry. Every accepted update bumps `edit_version`;
//! content-changing updates are also recorded for contribution statistics.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    CheckpointRequest, DocumentStore, DocumentUpdate, NewDocument, RevertRequest, StoreError,
};
use crate::domain::{
    ConflictDetails, Contribution, Document, DocumentId, UserId, VersionMeta, VersionRecord,
};

/// One content-changing write, reduced to character counts.
#[derive(Debug, Clone)]
struct ChangeRecord {
    author: Option<UserId>,
    characters_added: u64,
    characters_removed: u64,
}

#[derive(Debug)]
struct DocumentEntry {
    document: Document,
    owner: Option<UserId>,
    versions: Vec<VersionRecord>,
    changes: Vec<ChangeRecord>,
}

impl DocumentEntry {
    fn next_version_number(&self) -> u32 {
        self.versions
            .last()
            .map_or(1, |v| v.version_number.saturating_add(1))
    }

    fn checkpoint(&mut self, summary: String, author: Option<UserId>) -> VersionRecord {
        let content = self.document.content.clone();
        let record = VersionRecord {
            id: uuid::Uuid::new_v4(),
            document_id: self.document.id,
            version_number: self.next_version_number(),
            title: self.document.title.clone(),
            word_count: content.split_whitespace().count(),
            character_count: content.chars().count(),
            content,
            created_by: author,
            change_summary: summary,
            created_at: Utc::now(),
        };
        self.versions.push(record.clone());
        record
    }

    fn latest_checkpoint_matches(&self) -> bool {
        self.versions
            .last()
            .is_some_and(|v| v.content == self.document.content)
    }

    fn write(&mut self, content: String, author: Option<UserId>) {
        if content != self.document.content {
            let (characters_added, characters_removed) =
                char_delta(&self.document.content, &content);
            self.changes.push(ChangeRecord {
                author: author.clone(),
                characters_added,
                characters_removed,
            });
            self.document.content = content;
            self.document.last_edited_by = author;
        }
        self.document.edit_version = self.document.edit_version.saturating_add(1);
        self.document.updated_at = Utc::now();
    }
}

/// Reference persistence collaborator kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, DocumentEntry>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document at edit version 1 and returns it.
    pub async fn create(&self, request: NewDocument) -> Document {
        let document = Document::new(request.title, request.content);
        self.insert_with_owner(document.clone(), request.author)
            .await;
        document
    }

    /// Inserts an existing document, replacing any entry with the same id.
    pub async fn insert(&self, document: Document) {
        self.insert_with_owner(document, None).await;
    }

    async fn insert_with_owner(&self, document: Document, owner: Option<UserId>) {
        let id = document.id;
        let entry = DocumentEntry {
            document,
            owner,
            versions: Vec::new(),
            changes: Vec::new(),
        };
        self.documents.write().await.insert(id, entry);
    }

    /// Returns the number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns `true` if the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, document_id: DocumentId) -> Result<Document, StoreError> {
        let map = self.documents.read().await;
        map.get(&document_id)
            .map(|entry| entry.document.clone())
            .ok_or(StoreError::DocumentNotFound(document_id))
    }

    async fn update(
        &self,
        document_id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, StoreError> {
        let mut map = self.documents.write().await;
        let entry = map
            .get_mut(&document_id)
            .ok_or(StoreError::DocumentNotFound(document_id))?;

        let current = entry.document.edit_version;
        if let Some(expected) = update.expected_version
            && expected != current
        {
            tracing::warn!(
                %document_id,
                expected,
                current,
                "edit conflict detected"
            );
            return Err(StoreError::Conflict(Box::new(ConflictDetails {
                expected_version: Some(expected),
                current_version: current,
                server_content: entry.document.content.clone(),
                last_edited_by: entry.document.last_edited_by.clone(),
            })));
        }

        entry.write(update.content, update.author);
        tracing::debug!(%document_id, version = entry.document.edit_version, "document updated");
        Ok(entry.document.clone())
    }

    async fn create_version(
        &self,
        document_id: DocumentId,
        request: CheckpointRequest,
    ) -> Result<VersionRecord, StoreError> {
        let mut map = self.documents.write().await;
        let entry = map
            .get_mut(&document_id)
            .ok_or(StoreError::DocumentNotFound(document_id))?;

        if entry.latest_checkpoint_matches() {
            return Err(StoreError::NoChanges);
        }

        let summary = request
            .change_summary
            .unwrap_or_else(|| "Manual save".to_string());
        let record = entry.checkpoint(summary, request.author);
        tracing::info!(%document_id, version = record.version_number, "checkpoint created");
        Ok(record)
    }

    async fn revert(
        &self,
        document_id: DocumentId,
        request: RevertRequest,
    ) -> Result<Document, StoreError> {
        let mut map = self.documents.write().await;
        let entry = map
            .get_mut(&document_id)
            .ok_or(StoreError::DocumentNotFound(document_id))?;

        let target = entry
            .versions
            .iter()
            .find(|v| v.version_number == request.version_number)
            .map(|v| (v.content.clone(), v.title.clone()))
            .ok_or(StoreError::VersionNotFound(request.version_number))?;

        let (content, title) = target;
        entry.write(content, request.author.clone());
        entry.document.title = title;

        if !entry.latest_checkpoint_matches() {
            let summary = format!("Reverted to version {}", request.version_number);
            entry.checkpoint(summary, request.author);
        }

        tracing::info!(
            %document_id,
            reverted_to = request.version_number,
            version = entry.document.edit_version,
            "document reverted"
        );
        Ok(entry.document.clone())
    }

    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>, StoreError> {
        let map = self.documents.read().await;
        let entry = map
            .get(&document_id)
            .ok_or(StoreError::DocumentNotFound(document_id))?;
        Ok(entry.versions.iter().rev().map(VersionMeta::from).collect())
    }

    async fn contributions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Contribution>, StoreError> {
        let map = self.documents.read().await;
        let entry = map
            .get(&document_id)
            .ok_or(StoreError::DocumentNotFound(document_id))?;
        Ok(aggregate_contributions(entry))
    }
}

fn aggregate_contributions(entry: &DocumentEntry) -> Vec<Contribution> {
    let mut contributors: BTreeSet<UserId> = BTreeSet::new();
    contributors.extend(entry.changes.iter().filter_map(|c| c.author.clone()));
    contributors.extend(entry.versions.iter().filter_map(|v| v.created_by.clone()));
    contributors.extend(entry.owner.clone());
    contributors.extend(entry.document.last_edited_by.clone());

    let mut stats: Vec<Contribution> = contributors
        .into_iter()
        .map(|user_id| {
            let mine = entry
                .changes
                .iter()
                .filter(|c| c.author.as_ref() == Some(&user_id));
            let (total_changes, characters_added, characters_removed) =
                mine.fold((0u64, 0u64, 0u64), |(n, a, r), c| {
                    (n + 1, a + c.characters_added, r + c.characters_removed)
                });
            let versions_created = entry
                .versions
                .iter()
                .filter(|v| v.created_by.as_ref() == Some(&user_id))
                .count() as u64;
            Contribution {
                user_id,
                total_changes,
                characters_added,
                characters_removed,
                versions_created,
                percentage: 0.0,
            }
        })
        .collect();

    let total_activity: u64 = stats
        .iter()
        .map(|c| c.total_changes + c.versions_created)
        .sum();
    let count = stats.len();
    for c in &mut stats {
        c.percentage = if total_activity > 0 {
            round_one_decimal((c.total_changes + c.versions_created) as f64 * 100.0 / total_activity as f64)
        } else {
            round_one_decimal(100.0 / count as f64)
        };
    }

    let owner = entry.owner.as_ref();
    stats.sort_by(|a, b| {
        let a_owner = Some(&a.user_id) == owner;
        let b_owner = Some(&b.user_id) == owner;
        b_owner
            .cmp(&a_owner)
            .then(b.percentage.total_cmp(&a.percentage))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    stats
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Characters (added, removed) between two texts, measured on the single
/// region left after trimming the common prefix and suffix.
fn char_delta(old: &str, new: &str) -> (u64, u64) {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();
    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    let removed = old.len() - prefix - suffix;
    let added = new.len() - prefix - suffix;
    (added as u64, removed as u64)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    async fn seeded(content: &str) -> (InMemoryDocumentStore, DocumentId) {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .create(NewDocument {
                title: "Notes".to_string(),
                content: content.to_string(),
                author: Some(UserId::from("owner")),
            })
            .await;
        (store, doc.id)
    }

    fn update(content: &str, expected: Option<u64>, author: &str) -> DocumentUpdate {
        DocumentUpdate {
            content: content.to_string(),
            expected_version: expected,
            author: Some(UserId::from(author)),
        }
    }

    #[tokio::test]
    async fn matching_version_succeeds_with_greater_version() {
        let (store, id) = seeded("a").await;
        let Ok(doc) = store.update(id, update("ab", Some(1), "alice")).await else {
            panic!("update failed");
        };
        assert!(doc.edit_version > 1);
        assert_eq!(doc.content, "ab");
    }

    #[tokio::test]
    async fn unchanged_content_still_bumps_version() {
        let (store, id) = seeded("same").await;
        let Ok(doc) = store.update(id, update("same", Some(1), "alice")).await else {
            panic!("update failed");
        };
        assert_eq!(doc.edit_version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts_without_overwrite() {
        let (store, id) = seeded("base").await;
        let _ = store.update(id, update("theirs", Some(1), "bob")).await;

        let result = store.update(id, update("mine", Some(1), "alice")).await;
        let Err(StoreError::Conflict(details)) = result else {
            panic!("expected conflict");
        };
        assert_eq!(details.current_version, 2);
        assert_eq!(details.server_content, "theirs");

        let Ok(stored) = store.get(id).await else {
            panic!("document missing");
        };
        assert_eq!(stored.content, "theirs");
    }

    #[tokio::test]
    async fn force_update_skips_check() {
        let (store, id) = seeded("base").await;
        let _ = store.update(id, update("theirs", Some(1), "bob")).await;
        let Ok(doc) = store.update(id, update("mine", None, "alice")).await else {
            panic!("force update failed");
        };
        assert_eq!(doc.content, "mine");
        assert_eq!(doc.edit_version, 3);
    }

    #[tokio::test]
    async fn identical_checkpoint_is_rejected_and_not_stored() {
        let (store, id) = seeded("draft").await;
        let first = store.create_version(id, CheckpointRequest::default()).await;
        assert!(matches!(first, Ok(ref v) if v.version_number == 1));

        let second = store.create_version(id, CheckpointRequest::default()).await;
        assert_eq!(second, Err(StoreError::NoChanges));

        let Ok(history) = store.list_versions(id).await else {
            panic!("history failed");
        };
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn revert_restores_content_and_records_checkpoint() {
        let (store, id) = seeded("v1").await;
        let _ = store.create_version(id, CheckpointRequest::default()).await;
        let _ = store.update(id, update("v2", Some(1), "alice")).await;
        let _ = store.create_version(id, CheckpointRequest::default()).await;

        let Ok(doc) = store
            .revert(
                id,
                RevertRequest {
                    version_number: 1,
                    author: Some(UserId::from("alice")),
                },
            )
            .await
        else {
            panic!("revert failed");
        };
        assert_eq!(doc.content, "v1");
        assert_eq!(doc.edit_version, 3);

        let Ok(history) = store.list_versions(id).await else {
            panic!("history failed");
        };
        let numbers: Vec<u32> = history.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert_eq!(
            history.first().map(|v| v.change_summary.as_str()),
            Some("Reverted to version 1")
        );
    }

    #[tokio::test]
    async fn revert_to_unknown_version_fails() {
        let (store, id) = seeded("v1").await;
        let result = store
            .revert(
                id,
                RevertRequest {
                    version_number: 9,
                    author: None,
                },
            )
            .await;
        assert_eq!(result, Err(StoreError::VersionNotFound(9)));
    }

    #[tokio::test]
    async fn contributions_aggregate_per_user() {
        let (store, id) = seeded("hello").await;
        let _ = store.update(id, update("hello world", Some(1), "alice")).await;
        let _ = store.update(id, update("hello", Some(2), "bob")).await;
        let _ = store
            .create_version(
                id,
                CheckpointRequest {
                    change_summary: None,
                    author: Some(UserId::from("alice")),
                },
            )
            .await;

        let Ok(stats) = store.contributions(id).await else {
            panic!("contributions failed");
        };
        assert_eq!(stats.first().map(|c| c.user_id.as_str()), Some("owner"));

        let Some(alice) = stats.iter().find(|c| c.user_id.as_str() == "alice") else {
            panic!("alice missing");
        };
        assert_eq!(alice.total_changes, 1);
        assert_eq!(alice.characters_added, 6);
        assert_eq!(alice.versions_created, 1);

        let Some(bob) = stats.iter().find(|c| c.user_id.as_str() == "bob") else {
            panic!("bob missing");
        };
        assert_eq!(bob.characters_removed, 6);
        assert!((alice.percentage - 66.7).abs() < f64::EPSILON);
    }

    #[test]
    fn char_delta_trims_common_affixes() {
        assert_eq!(char_delta("abc", "abXc"), (1, 0));
        assert_eq!(char_delta("abc", "ac"), (0, 1));
        assert_eq!(char_delta("aaa", "aa"), (0, 1));
        assert_eq!(char_delta("", "héllo"), (5, 0));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let store = InMemoryDocumentStore::new();
        let id = DocumentId::new();
        assert_eq!(
            store.get(id).await,
            Err(StoreError::DocumentNotFound(id))
        );
        assert!(store.is_empty().await);
    }
}
