//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::persistence::InMemoryDocumentStore;
use crate::relay::{RoomEvent, RoomRegistry};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Document, version and contribution storage.
    pub store: Arc<InMemoryDocumentStore>,
    /// Document rooms and their members.
    pub rooms: Arc<RoomRegistry>,
    /// Room traffic fanned out to every WebSocket connection.
    pub room_events: EventBus<RoomEvent>,
}

impl AppState {
    /// Creates an empty relay state whose room bus holds `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Arc::new(InMemoryDocumentStore::new()),
            rooms: Arc::new(RoomRegistry::new()),
            room_events: EventBus::new(capacity),
        }
    }
}
