//! Presence records: room participants and remote cursors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// A member of a document room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Presence colour.
    pub color: String,
}

impl Participant {
    /// Creates a participant whose colour is derived from the user id.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        let color = user_id.color();
        Self {
            user_id,
            username: username.into(),
            color,
        }
    }
}

/// Last known cursor and selection of a remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCursor {
    /// Remote user.
    pub user_id: UserId,
    /// Absolute caret offset.
    pub position: usize,
    /// Selection anchor, if a range is selected.
    pub selection_start: Option<usize>,
    /// Selection end, if a range is selected.
    pub selection_end: Option<usize>,
    /// Display name sent by the relay.
    pub display_name: String,
    /// Presence colour sent by the relay.
    pub color: String,
    /// When this cursor was last updated locally.
    pub last_updated: DateTime<Utc>,
}

/// Remote cursors of the active document, keyed by user.
///
/// Last update wins per user; entries are pruned when the user leaves.
#[derive(Debug, Default, Clone)]
pub struct CursorSet {
    cursors: HashMap<UserId, RemoteCursor>,
}

impl CursorSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `cursor`, replacing any earlier entry for the same user.
    pub fn upsert(&mut self, cursor: RemoteCursor) {
        self.cursors.insert(cursor.user_id.clone(), cursor);
    }

    /// Removes the cursor of `user_id`. Returns `true` if one was present.
    pub fn remove(&mut self, user_id: &UserId) -> bool {
        self.cursors.remove(user_id).is_some()
    }

    /// Drops every cursor.
    pub fn clear(&mut self) {
        self.cursors.clear();
    }

    /// Returns the cursor of `user_id`, if known.
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    /// Returns all cursors ordered by user id.
    #[must_use]
    pub fn to_sorted_vec(&self) -> Vec<RemoteCursor> {
        let mut all: Vec<RemoteCursor> = self.cursors.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    /// Number of tracked cursors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Returns `true` if no cursor is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
