//! Wire frames: `{type, ...fields}` JSON objects over one WebSocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DocumentId, Participant, UserId};

/// Close code for an intentional, normal closure. Never retried.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code used when the channel vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Shape of a text mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// `content` inserted at `position`.
    Insert,
    /// `length` characters removed at `position`.
    Delete,
    /// `length` characters at `position` replaced by `content`.
    #[default]
    Replace,
}

/// A text mutation descriptor. Offsets and lengths count characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    /// Mutation shape.
    #[serde(rename = "type", default)]
    pub kind: ChangeKind,
    /// Character offset the mutation applies at.
    #[serde(default)]
    pub position: usize,
    /// Inserted text.
    #[serde(default)]
    pub content: String,
    /// Number of characters affected.
    #[serde(default)]
    pub length: usize,
}

impl TextChange {
    /// Whole-buffer replacement: `{position: 0, content, length: previous_len}`.
    #[must_use]
    pub fn replace_all(content: impl Into<String>, previous_len: usize) -> Self {
        Self {
            kind: ChangeKind::Replace,
            position: 0,
            content: content.into(),
            length: previous_len,
        }
    }
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Enter a document room.
    JoinDocument {
        /// Room to join.
        document_id: DocumentId,
    },
    /// Exit a document room.
    LeaveDocument {
        /// Room to leave.
        document_id: DocumentId,
    },
    /// Broadcast a local text mutation to the room.
    TextChange {
        /// Room.
        document_id: DocumentId,
        /// Mutation descriptor.
        change: TextChange,
    },
    /// Broadcast the local caret and selection to the room.
    CursorUpdate {
        /// Room.
        document_id: DocumentId,
        /// Absolute caret offset.
        position: usize,
        /// Selection anchor.
        selection_start: Option<usize>,
        /// Selection end.
        selection_end: Option<usize>,
    },
    /// Keepalive.
    Ping,
}

impl ClientFrame {
    /// Returns the wire `type` of this frame.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::JoinDocument { .. } => "join_document",
            Self::LeaveDocument { .. } => "leave_document",
            Self::TextChange { .. } => "text_change",
            Self::CursorUpdate { .. } => "cursor_update",
            Self::Ping => "ping",
        }
    }

    /// Returns the room this frame targets, if any.
    #[must_use]
    pub const fn document_id(&self) -> Option<DocumentId> {
        match self {
            Self::JoinDocument { document_id }
            | Self::LeaveDocument { document_id }
            | Self::TextChange { document_id, .. }
            | Self::CursorUpdate { document_id, .. } => Some(*document_id),
            Self::Ping => None,
        }
    }
}

/// Server → client frames, plus the lifecycle frames the connection manager
/// synthesizes locally (`connected`, `disconnected`, `reconnecting`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Channel opened.
    Connected {
        /// Identity the relay resolved for this connection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Greeting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Terminal disconnect.
    Disconnected {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Transient disconnect; a reconnect is scheduled.
    Reconnecting {
        /// 1-based retry attempt.
        attempt: u32,
        /// Delay before the attempt, in milliseconds.
        delay_ms: u64,
        /// Close code that triggered the retry.
        code: u16,
        /// Close reason that triggered the retry.
        reason: String,
    },
    /// A user joined a room.
    UserJoined {
        /// Room.
        document_id: DocumentId,
        /// Joining user.
        user_id: UserId,
        /// Display name of the joining user.
        #[serde(default)]
        username: String,
        /// Room members after the join.
        #[serde(default)]
        active_users: Vec<Participant>,
    },
    /// A user left a room.
    UserLeft {
        /// Room.
        document_id: DocumentId,
        /// Leaving user.
        user_id: UserId,
        /// Display name of the leaving user.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Room members after the leave.
        #[serde(default)]
        active_users: Vec<Participant>,
    },
    /// Room membership sent to a user right after it joins.
    RoomInfo {
        /// Room.
        document_id: DocumentId,
        /// Room members, including the joiner.
        active_users: Vec<Participant>,
    },
    /// A remote text mutation.
    TextChange {
        /// Room.
        document_id: DocumentId,
        /// Author.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Display name of the author.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Mutation descriptor.
        change: TextChange,
        /// Relay timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A remote caret/selection update.
    CursorUpdate {
        /// Room.
        document_id: DocumentId,
        /// Remote user.
        user_id: UserId,
        /// Absolute caret offset.
        position: usize,
        /// Selection anchor.
        #[serde(default)]
        selection_start: Option<usize>,
        /// Selection end.
        #[serde(default)]
        selection_end: Option<usize>,
        /// Display name.
        #[serde(default)]
        username: String,
        /// Presence colour.
        #[serde(default)]
        color: String,
    },
    /// The persisted document changed.
    DocumentUpdated {
        /// Room.
        document_id: DocumentId,
        /// Writer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Edit version after the write.
        version: u64,
        /// Content after the write.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Keepalive reply.
    Pong,
    /// Protocol-level error.
    Error {
        /// Numeric error code.
        #[serde(default)]
        code: u16,
        /// Human-readable description.
        #[serde(default)]
        message: String,
    },
}

impl ServerFrame {
    /// Returns the wire `type` of this frame.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::RoomInfo { .. } => "room_info",
            Self::TextChange { .. } => "text_change",
            Self::CursorUpdate { .. } => "cursor_update",
            Self::DocumentUpdated { .. } => "document_updated",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Serializes the frame to a JSON object value.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Failure to turn raw text into an [`InboundFrame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text is not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The object carries no string `type` field.
    #[error("frame has no type field")]
    MissingType,
}

/// A decoded inbound frame: its `type` plus the whole object, verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Value of the `type` field.
    pub event_type: String,
    /// The full frame object.
    pub payload: Value,
}

impl InboundFrame {
    /// Decodes `text` without validating anything beyond the `type` field.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if `text` is not a JSON object and
    /// [`FrameError::MissingType`] if it has no string `type` field.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let payload: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        if !payload.is_object() {
            return Err(FrameError::Malformed("expected a JSON object".to_string()));
        }
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?
            .to_string();
        Ok(Self {
            event_type,
            payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_to_bare_type() {
        let json = serde_json::to_string(&ClientFrame::Ping).unwrap_or_default();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn text_change_frame_matches_wire_shape() {
        let doc = DocumentId::new();
        let frame = ClientFrame::TextChange {
            document_id: doc,
            change: TextChange::replace_all("abc", 2),
        };
        let value = serde_json::to_value(&frame).unwrap_or_default();
        assert_eq!(value["type"], "text_change");
        assert_eq!(value["document_id"], doc.to_string());
        assert_eq!(value["change"]["type"], "replace");
        assert_eq!(value["change"]["position"], 0);
        assert_eq!(value["change"]["content"], "abc");
        assert_eq!(value["change"]["length"], 2);
    }

    #[test]
    fn inbound_cursor_update_parses_relay_fields() {
        let doc = DocumentId::new();
        let text = format!(
            r#"{{"type":"cursor_update","document_id":"{doc}","user_id":"bob","position":4,
                "selection_start":null,"selection_end":null,"username":"Bob","color":"hsl(1, 70%, 50%)"}}"#
        );
        let Ok(inbound) = InboundFrame::decode(&text) else {
            panic!("decode failed");
        };
        assert_eq!(inbound.event_type, "cursor_update");
        let Ok(ServerFrame::CursorUpdate { position, username, .. }) =
            serde_json::from_value::<ServerFrame>(inbound.payload)
        else {
            panic!("expected cursor update");
        };
        assert_eq!(position, 4);
        assert_eq!(username, "Bob");
    }

    #[test]
    fn unknown_types_decode_verbatim() {
        let Ok(inbound) = InboundFrame::decode(r#"{"type":"version_created","data":{"n":3}}"#)
        else {
            panic!("decode failed");
        };
        assert_eq!(inbound.event_type, "version_created");
        assert_eq!(inbound.payload["data"]["n"], 3);
    }

    #[test]
    fn decode_rejects_non_objects_and_missing_type() {
        assert!(matches!(
            InboundFrame::decode("[1,2]"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"kind":"x"}"#),
            Err(FrameError::MissingType)
        ));
    }

    #[test]
    fn connected_frame_without_fields_parses() {
        let parsed = serde_json::from_str::<ServerFrame>(r#"{"type":"connected"}"#);
        assert!(matches!(
            parsed,
            Ok(ServerFrame::Connected {
                user_id: None,
                message: None
            })
        ));
    }
}
