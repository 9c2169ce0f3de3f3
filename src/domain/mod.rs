//! Domain layer: identifiers, records, and the event system.
//!
//! This module contains the model shared by the client core and the relay:
//! document identity, stored documents and checkpoints, presence records,
//! client state records, the upstream [`SyncEvent`] notifications and the
//! broadcast [`EventBus`].

pub mod document;
pub mod event_bus;
pub mod ids;
pub mod presence;
pub mod state;
pub mod sync_event;

pub use document::{ConflictDetails, Contribution, Document, VersionMeta, VersionRecord};
pub use event_bus::EventBus;
pub use ids::{DocumentId, UserId};
pub use presence::{CursorSet, Participant, RemoteCursor};
pub use state::{ConflictRecord, ConnectionState, Resolution, SaveStatus};
pub use sync_event::SyncEvent;
