//! Client-side state records shared between the sync components and their
//! upstream consumers.

use serde::{Deserialize, Serialize};

/// Lifecycle of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel; may be waiting for a scheduled reconnect.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Channel established; outbound frames are delivered.
    Open,
    /// Channel is being closed on request.
    Closing,
}

impl ConnectionState {
    /// Returns the state name as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

/// User-visible save indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SaveStatus {
    /// Local content matches the last successful write.
    #[default]
    Saved,
    /// Local edits are waiting for the debounce window to close.
    Pending,
    /// A write is in flight.
    Saving,
    /// The last write failed; local content is preserved.
    Error(String),
    /// A version conflict awaits an explicit resolution.
    Conflict,
}

/// Both sides of a save that hit a version mismatch.
///
/// Created when the persistence collaborator rejects a save; resolved only
/// by an explicit [`Resolution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    /// Unsaved local content at the time the conflict was detected.
    pub local_content: String,
    /// Content the server currently stores.
    pub server_content: String,
    /// Version the server currently stores.
    pub server_version: u64,
}

/// The two terminal outcomes of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Force-overwrite the server with local content.
    KeepLocal,
    /// Discard unsaved local content and adopt the server's.
    AcceptServer,
}
