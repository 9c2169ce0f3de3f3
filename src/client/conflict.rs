//! Save/conflict state machine.
//!
//! Pure bookkeeping with no I/O and no timers: the autosave coordinator
//! drives it and performs the writes.
//!
//! | From          | Step                          | To            |
//! |---------------|-------------------------------|---------------|
//! | Clean         | `record_edit`                 | PendingSave   |
//! | PendingSave   | `save_succeeded` (not dirty)  | Clean         |
//! | PendingSave   | `save_failed`                 | PendingSave   |
//! | PendingSave   | `save_conflicted`             | Conflicted    |
//! | Conflicted    | `resolve(AcceptServer)`       | Clean         |
//! | Conflicted    | `resolve(KeepLocal)`          | Resolving     |
//! | Resolving     | `resolution_succeeded`        | Clean         |
//! | Resolving     | `resolution_failed`           | Conflicted    |

use crate::domain::{ConflictRecord, Resolution, SaveStatus};
use crate::error::SyncError;

/// Where the local buffer stands relative to the last durable write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveState {
    /// Local content matches the last durable write.
    #[default]
    Clean,
    /// Local content has changes not yet written.
    PendingSave,
    /// A save hit a version mismatch; autosave is blocked until resolved.
    Conflicted(ConflictRecord),
    /// A keep-local force write is in flight.
    Resolving(ConflictRecord),
}

impl SaveState {
    /// Returns the state name as a static string slice.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::PendingSave => "pending_save",
            Self::Conflicted(_) => "conflicted",
            Self::Resolving(_) => "resolving",
        }
    }
}

/// Save state, believed server version and user-visible status.
#[derive(Debug, Clone, Default)]
pub struct SaveStateMachine {
    state: SaveState,
    version: u64,
    status: SaveStatus,
}

impl SaveStateMachine {
    /// Starts clean at `version`.
    #[must_use]
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SaveState {
        &self.state
    }

    /// Version the client believes the server stores.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// User-visible save status.
    #[must_use]
    pub const fn status(&self) -> &SaveStatus {
        &self.status
    }

    /// The unresolved conflict, if any.
    #[must_use]
    pub const fn conflict(&self) -> Option<&ConflictRecord> {
        match &self.state {
            SaveState::Conflicted(record) | SaveState::Resolving(record) => Some(record),
            SaveState::Clean | SaveState::PendingSave => None,
        }
    }

    /// Returns `true` while a conflict blocks autosave.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        self.conflict().is_some()
    }

    /// Notes a local edit. Returns `true` if autosave should be scheduled,
    /// `false` while a conflict blocks it.
    pub fn record_edit(&mut self) -> bool {
        match self.state {
            SaveState::Clean | SaveState::PendingSave => {
                self.state = SaveState::PendingSave;
                if self.status != SaveStatus::Saving {
                    self.status = SaveStatus::Pending;
                }
                true
            }
            SaveState::Conflicted(_) | SaveState::Resolving(_) => false,
        }
    }

    /// Starts a debounced save. Returns the version to send as expected.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] unless there are pending
    /// changes and no conflict.
    pub fn begin_save(&mut self) -> Result<u64, SyncError> {
        match self.state {
            SaveState::PendingSave => {
                self.status = SaveStatus::Saving;
                Ok(self.version)
            }
            _ => Err(self.invalid("save")),
        }
    }

    /// Records a successful save at `version`. `still_dirty` is `true` if
    /// the buffer changed while the save was in flight.
    pub fn save_succeeded(&mut self, version: u64, still_dirty: bool) {
        self.version = version;
        if self.state == SaveState::PendingSave {
            if still_dirty {
                self.status = SaveStatus::Pending;
            } else {
                self.state = SaveState::Clean;
                self.status = SaveStatus::Saved;
            }
        }
    }

    /// Records a failed save. Local changes stay pending.
    pub fn save_failed(&mut self, message: impl Into<String>) {
        if self.state == SaveState::PendingSave {
            self.status = SaveStatus::Error(message.into());
        }
    }

    /// Records a version mismatch reported for the in-flight save.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] unless a save was pending.
    pub fn save_conflicted(&mut self, record: ConflictRecord) -> Result<(), SyncError> {
        match self.state {
            SaveState::PendingSave => {
                self.state = SaveState::Conflicted(record);
                self.status = SaveStatus::Conflict;
                Ok(())
            }
            _ => Err(self.invalid("record conflict")),
        }
    }

    /// Applies the user's choice to an unresolved conflict and returns the
    /// conflict record.
    ///
    /// `AcceptServer` is terminal: the machine is clean at the server's
    /// version. `KeepLocal` moves to `Resolving` until the force write
    /// reports back.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] unless conflicted.
    pub fn resolve(&mut self, resolution: Resolution) -> Result<ConflictRecord, SyncError> {
        let SaveState::Conflicted(record) = &self.state else {
            return Err(self.invalid("resolve"));
        };
        let record = record.clone();
        match resolution {
            Resolution::KeepLocal => {
                self.state = SaveState::Resolving(record.clone());
                self.status = SaveStatus::Saving;
            }
            Resolution::AcceptServer => {
                self.version = record.server_version;
                self.state = SaveState::Clean;
                self.status = SaveStatus::Saved;
            }
        }
        Ok(record)
    }

    /// Records a successful keep-local force write.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] unless resolving.
    pub fn resolution_succeeded(&mut self, version: u64) -> Result<(), SyncError> {
        match self.state {
            SaveState::Resolving(_) => {
                self.version = version;
                self.state = SaveState::Clean;
                self.status = SaveStatus::Saved;
                Ok(())
            }
            _ => Err(self.invalid("finish resolution")),
        }
    }

    /// Returns to `Conflicted` after a failed force write.
    pub fn resolution_failed(&mut self) {
        if let SaveState::Resolving(record) = &self.state {
            self.state = SaveState::Conflicted(record.clone());
            self.status = SaveStatus::Conflict;
        }
    }

    /// Adopts a server version for content that is already in sync.
    pub fn adopt_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Drops all pending state and starts clean at `version`.
    pub fn reset(&mut self, version: u64) {
        self.state = SaveState::Clean;
        self.status = SaveStatus::Saved;
        self.version = version;
    }

    fn invalid(&self, action: &'static str) -> SyncError {
        SyncError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}
