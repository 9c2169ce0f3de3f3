//! Relay server: document rooms over WebSocket.
//!
//! Each connection joins document rooms; text and cursor traffic is fanned
//! out to the other members of the room through a shared
//! [`crate::domain::EventBus`] of [`RoomEvent`]s. The REST layer publishes
//! `document_updated` frames through the same bus.

pub mod connection;
pub mod events;
pub mod handler;
pub mod membership;
pub mod rooms;

pub use connection::{ClientIdentity, ConnectionContext, handle_text, run_connection};
pub use events::{Exclude, RoomEvent};
pub use handler::{ConnectParams, INVALID_TOKEN, ws_handler};
pub use membership::Membership;
pub use rooms::{ConnectionId, RelayStats, RoomChange, RoomRegistry};
