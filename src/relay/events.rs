//! Room-scoped frames fanned out through the relay's [`crate::domain::EventBus`].

use super::rooms::ConnectionId;
use crate::domain::{DocumentId, UserId};
use crate::protocol::ServerFrame;

/// Who in the room must not receive an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclude {
    /// Deliver to every member.
    Nobody,
    /// Skip the originating connection.
    Connection(ConnectionId),
    /// Skip every connection of the originating user.
    User(UserId),
}

/// A frame addressed to the members of one document room.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Target room.
    pub document_id: DocumentId,
    /// Members to skip.
    pub exclude: Exclude,
    /// Frame to deliver.
    pub frame: ServerFrame,
}

impl RoomEvent {
    /// An event for every member of the room.
    #[must_use]
    pub const fn to_room(document_id: DocumentId, frame: ServerFrame) -> Self {
        Self {
            document_id,
            exclude: Exclude::Nobody,
            frame,
        }
    }

    /// An event for every member but `connection`.
    #[must_use]
    pub const fn from_connection(
        document_id: DocumentId,
        connection: ConnectionId,
        frame: ServerFrame,
    ) -> Self {
        Self {
            document_id,
            exclude: Exclude::Connection(connection),
            frame,
        }
    }

    /// An event for every member except the connections of `user_id`, or
    /// for everyone when the originator is unknown.
    #[must_use]
    pub fn from_user(document_id: DocumentId, user_id: Option<UserId>, frame: ServerFrame) -> Self {
        Self {
            document_id,
            exclude: user_id.map_or(Exclude::Nobody, Exclude::User),
            frame,
        }
    }

    /// Returns `true` if the connection `connection` of `user_id` should
    /// receive this event.
    #[must_use]
    pub fn is_for(&self, connection: ConnectionId, user_id: &UserId) -> bool {
        match &self.exclude {
            Exclude::Nobody => true,
            Exclude::Connection(origin) => *origin != connection,
            Exclude::User(origin) => origin != user_id,
        }
    }
}
