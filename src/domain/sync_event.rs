//! Notifications the client core publishes to upstream consumers.
//!
//! Every change a UI would render (presence, remote content, cursors, save
//! status, conflicts, connectivity) is emitted as a [`SyncEvent`] through
//! the client's [`super::EventBus`].

use serde::Serialize;

use super::{
    ConflictRecord, DocumentId, Participant, RemoteCursor, Resolution, SaveStatus, UserId,
};

/// Upstream notification emitted by the sync core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The channel opened (first connect or reconnect).
    Connected,

    /// The channel dropped and a reconnect is scheduled.
    Reconnecting {
        /// 1-based retry attempt.
        attempt: u32,
        /// Delay before the attempt, in milliseconds.
        delay_ms: u64,
    },

    /// Terminal disconnect: explicit close or retries exhausted. The local
    /// edit buffer is preserved.
    Offline {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Error frame from the relay or a transport error.
    ServerError {
        /// Human-readable description.
        message: String,
    },

    /// A user joined a document room.
    PresenceJoined {
        /// Room.
        document_id: DocumentId,
        /// Joining user.
        user_id: UserId,
        /// Display name of the joining user.
        username: String,
        /// Room members after the join.
        active_users: Vec<Participant>,
    },

    /// A user left a document room.
    PresenceLeft {
        /// Room.
        document_id: DocumentId,
        /// Leaving user.
        user_id: UserId,
    },

    /// The local buffer was replaced by remote content.
    RemoteContent {
        /// Active document.
        document_id: DocumentId,
        /// New buffer content.
        content: String,
    },

    /// The remote cursor set of the active document changed.
    CursorsChanged {
        /// Active document.
        document_id: DocumentId,
        /// All remote cursors, ordered by user id.
        cursors: Vec<RemoteCursor>,
    },

    /// The save indicator changed.
    SaveStatusChanged {
        /// Active document.
        document_id: DocumentId,
        /// New indicator value.
        status: SaveStatus,
    },

    /// A save was rejected because the server moved on.
    ConflictDetected {
        /// Active document.
        document_id: DocumentId,
        /// Both sides of the conflict.
        record: ConflictRecord,
    },

    /// A conflict reached a terminal outcome.
    ConflictResolved {
        /// Active document.
        document_id: DocumentId,
        /// Chosen outcome.
        resolution: Resolution,
        /// Version the client now believes current.
        version: u64,
    },

    /// The document was deselected while a conflict was unresolved.
    ConflictAbandoned {
        /// Deselected document.
        document_id: DocumentId,
        /// The unresolved conflict, including the unsaved local content.
        record: ConflictRecord,
    },

    /// The document was reverted to an earlier checkpoint.
    Reverted {
        /// Active document.
        document_id: DocumentId,
        /// Checkpoint the content was restored from.
        version_number: u32,
        /// Edit version after the revert.
        version: u64,
    },
}

impl SyncEvent {
    /// Returns the document this event is scoped to, if any.
    #[must_use]
    pub fn document_id(&self) -> Option<DocumentId> {
        match self {
            Self::PresenceJoined { document_id, .. }
            | Self::PresenceLeft { document_id, .. }
            | Self::RemoteContent { document_id, .. }
            | Self::CursorsChanged { document_id, .. }
            | Self::SaveStatusChanged { document_id, .. }
            | Self::ConflictDetected { document_id, .. }
            | Self::ConflictResolved { document_id, .. }
            | Self::ConflictAbandoned { document_id, .. }
            | Self::Reverted { document_id, .. } => Some(*document_id),
            Self::Connected
            | Self::Reconnecting { .. }
            | Self::Offline { .. }
            | Self::ServerError { .. } => None,
        }
    }

    /// Returns the event name as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Offline { .. } => "offline",
            Self::ServerError { .. } => "server_error",
            Self::PresenceJoined { .. } => "presence_joined",
            Self::PresenceLeft { .. } => "presence_left",
            Self::RemoteContent { .. } => "remote_content",
            Self::CursorsChanged { .. } => "cursors_changed",
            Self::SaveStatusChanged { .. } => "save_status_changed",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::ConflictAbandoned { .. } => "conflict_abandoned",
            Self::Reverted { .. } => "reverted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_event_serializes_with_tag() {
        let event = SyncEvent::ConflictDetected {
            document_id: DocumentId::new(),
            record: ConflictRecord {
                local_content: "mine".to_string(),
                server_content: "theirs".to_string(),
                server_version: 4,
            },
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"event\":\"conflict_detected\""));
        assert!(json.contains("theirs"));
        assert_eq!(event.event_type_str(), "conflict_detected");
    }

    #[test]
    fn connection_events_are_unscoped() {
        assert_eq!(SyncEvent::Connected.document_id(), None);
        let offline = SyncEvent::Offline {
            code: 1006,
            reason: "gone".to_string(),
        };
        assert_eq!(offline.document_id(), None);
    }
}
