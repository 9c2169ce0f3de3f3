//! # collab-sync
//!
//! Real-time collaborative editing core: a client-side synchronization
//! engine plus the reference relay it talks to.
//!
//! The client keeps one persistent WebSocket to the relay, joins one
//! document room at a time, propagates local edits as whole-buffer
//! replacements, debounces cursor broadcasts and autosaves, and resolves
//! optimistic-concurrency conflicts with the persistence API.
//!
//! ## Architecture
//!
//! ```text
//! UI / caller
//!     │  SyncClient (client/)           SyncEvent bus (domain/)
//!     │
//!     ├── ConnectionManager ── WsConnector ──────────┐
//!     ├── SessionController                          │ JSON frames (protocol/)
//!     ├── EditChannel                                │
//!     └── SaveCoordinator ── HttpDocumentStore ──┐   │
//!                                                │   │
//! collab-relay (bin)                             │   │
//!     ├── REST handlers (api/) ◄─────────────────┘   │
//!     ├── WS relay (relay/) ◄────────────────────────┘
//!     └── InMemoryDocumentStore (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod relay;
