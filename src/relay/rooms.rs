//! Room registry: which connections are in which document room.
//!
//! A room is created by its first join and removed with its last member.
//! Members are keyed by [`ConnectionId`] so one user can hold the same
//! document open from several connections.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::domain::{DocumentId, Participant};

/// Identifier of one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room membership after a join or leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChange {
    /// The participant that joined or left.
    pub participant: Participant,
    /// Members after the change, ordered by user id.
    pub active_users: Vec<Participant>,
}

/// Connection and room counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RelayStats {
    /// Open WebSocket connections.
    pub total_connections: usize,
    /// Rooms with at least one member.
    pub document_rooms: usize,
    /// Member count per room.
    #[schema(value_type = Object)]
    pub users_per_room: BTreeMap<DocumentId, usize>,
}

/// Concurrent map of document rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<DocumentId, HashMap<ConnectionId, Participant>>>,
    connections: AtomicUsize,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a newly opened connection.
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a closed connection.
    pub fn connection_closed(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Adds `participant` to the room of `document_id`. Joining twice from
    /// the same connection refreshes the entry.
    pub async fn join(
        &self,
        document_id: DocumentId,
        connection: ConnectionId,
        participant: Participant,
    ) -> RoomChange {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(document_id).or_default();
        room.insert(connection, participant.clone());
        RoomChange {
            participant,
            active_users: sorted_members(room),
        }
    }

    /// Removes `connection` from the room of `document_id`. Returns `None`
    /// if it was not a member.
    pub async fn leave(&self, document_id: DocumentId, connection: ConnectionId) -> Option<RoomChange> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(&document_id)?;
        let participant = room.remove(&connection)?;
        let active_users = sorted_members(room);
        if room.is_empty() {
            rooms.remove(&document_id);
        }
        Some(RoomChange {
            participant,
            active_users,
        })
    }

    /// Removes `connection` from every room it is in.
    pub async fn leave_all(&self, connection: ConnectionId) -> Vec<(DocumentId, RoomChange)> {
        let mut rooms = self.rooms.write().await;
        let mut changes = Vec::new();
        rooms.retain(|document_id, room| {
            if let Some(participant) = room.remove(&connection) {
                changes.push((
                    *document_id,
                    RoomChange {
                        participant,
                        active_users: sorted_members(room),
                    },
                ));
            }
            !room.is_empty()
        });
        changes
    }

    /// Members of the room of `document_id`, ordered by user id.
    pub async fn members(&self, document_id: DocumentId) -> Vec<Participant> {
        self.rooms
            .read()
            .await
            .get(&document_id)
            .map(sorted_members)
            .unwrap_or_default()
    }

    /// Current counters.
    pub async fn stats(&self) -> RelayStats {
        let rooms = self.rooms.read().await;
        RelayStats {
            total_connections: self.connections.load(Ordering::Relaxed),
            document_rooms: rooms.len(),
            users_per_room: rooms.iter().map(|(id, room)| (*id, room.len())).collect(),
        }
    }
}

fn sorted_members(room: &HashMap<ConnectionId, Participant>) -> Vec<Participant> {
    let mut members: Vec<Participant> = room.values().cloned().collect();
    members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    members
}
