//! Per-connection room membership.
//!
//! Mirrors the rooms a single connection joined so that its event loop can
//! filter room traffic without touching the shared registry.

use std::collections::HashSet;

use crate::domain::DocumentId;

/// Rooms joined by one connection.
#[derive(Debug, Default)]
pub struct Membership {
    documents: HashSet<DocumentId>,
}

impl Membership {
    /// Creates an empty membership.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a join. Returns `false` if the room was already joined.
    pub fn join(&mut self, document_id: DocumentId) -> bool {
        self.documents.insert(document_id)
    }

    /// Records a leave. Returns `false` if the room was not joined.
    pub fn leave(&mut self, document_id: DocumentId) -> bool {
        self.documents.remove(&document_id)
    }

    /// Returns `true` if traffic for `document_id` should reach this
    /// connection.
    #[must_use]
    pub fn matches(&self, document_id: DocumentId) -> bool {
        self.documents.contains(&document_id)
    }

    /// Number of joined rooms.
    #[must_use]
    pub fn count(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matches_nothing() {
        assert!(!Membership::new().matches(DocumentId::new()));
    }

    #[test]
    fn join_and_leave_track_rooms() {
        let mut rooms = Membership::new();
        let doc = DocumentId::new();
        assert!(rooms.join(doc));
        assert!(!rooms.join(doc));
        assert!(rooms.matches(doc));
        assert!(!rooms.matches(DocumentId::new()));
        assert_eq!(rooms.count(), 1);
        assert!(rooms.leave(doc));
        assert!(!rooms.leave(doc));
        assert_eq!(rooms.count(), 0);
    }
}
