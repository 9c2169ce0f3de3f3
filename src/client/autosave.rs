//! Autosave & Conflict Coordinator.
//!
//! Every local edit re-arms one debounce timer; when it fires, the content
//! present at that moment is written with the believed version as the
//! optimistic-concurrency token. Intermediate states are never queued.
//! At most one write is in flight: a timer that fires during a write only
//! marks another save as due.
//!
//! A version mismatch creates a [`ConflictRecord`] and blocks autosave
//! until [`SaveCoordinator::resolve`] is called. Nothing is retried or
//! merged automatically.
//!
//! Writes run on spawned tasks and report back through the
//! [`AutosaveNotify`] callback; the owner feeds those reports to
//! [`SaveCoordinator::on_save_finished`]. Reports for a document that is no
//! longer attached, or for a write that was superseded, are ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::conflict::{SaveState, SaveStateMachine};
use super::scheduler::{ScheduledTask, Ticket};
use crate::domain::{
    ConflictRecord, Document, DocumentId, EventBus, Resolution, SaveStatus, SyncEvent, UserId,
};
use crate::error::SyncError;
use crate::persistence::{DocumentStore, DocumentUpdate, StoreError};

/// Completion of a spawned write.
#[derive(Debug)]
pub struct SaveReport {
    /// Document the write targeted.
    pub document_id: DocumentId,
    /// Identifier of the write.
    pub request: u64,
    /// Store outcome.
    pub result: Result<Document, StoreError>,
}

/// Notifications the coordinator needs routed back to it.
#[derive(Debug)]
pub enum AutosaveSignal {
    /// The debounce window closed.
    Due(Ticket),
    /// A write completed.
    Finished(SaveReport),
}

/// Callback that routes [`AutosaveSignal`]s back to the coordinator's owner.
pub type AutosaveNotify = Arc<dyn Fn(AutosaveSignal) + Send + Sync>;

/// Reply channel for a keep-local resolution.
pub type ResolutionReply = oneshot::Sender<Result<u64, SyncError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Autosave,
    Force,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request: u64,
    edit_seq: u64,
    kind: WriteKind,
}

/// Debounced, versioned writes for the active document.
pub struct SaveCoordinator {
    store: Arc<dyn DocumentStore>,
    events: EventBus<SyncEvent>,
    notify: AutosaveNotify,
    debounce: Duration,
    author: Option<UserId>,
    document_id: Option<DocumentId>,
    content: String,
    machine: SaveStateMachine,
    published_status: SaveStatus,
    timer: ScheduledTask,
    edit_seq: u64,
    next_request: u64,
    in_flight: Option<InFlight>,
    save_due: bool,
    resolution_reply: Option<ResolutionReply>,
}

impl fmt::Debug for SaveCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveCoordinator")
            .field("document_id", &self.document_id)
            .field("debounce", &self.debounce)
            .field("machine", &self.machine)
            .field("in_flight", &self.in_flight)
            .field("save_due", &self.save_due)
            .finish_non_exhaustive()
    }
}

impl SaveCoordinator {
    /// Creates a detached coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: EventBus<SyncEvent>,
        notify: AutosaveNotify,
        debounce: Duration,
        author: Option<UserId>,
    ) -> Self {
        Self {
            store,
            events,
            notify,
            debounce,
            author,
            document_id: None,
            content: String::new(),
            machine: SaveStateMachine::default(),
            published_status: SaveStatus::Saved,
            timer: ScheduledTask::new(),
            edit_seq: 0,
            next_request: 0,
            in_flight: None,
            save_due: false,
            resolution_reply: None,
        }
    }

    /// Starts tracking `document` at its stored content and version.
    pub fn attach(&mut self, document: &Document) {
        self.detach();
        self.document_id = Some(document.id);
        self.content.clone_from(&document.content);
        self.machine = SaveStateMachine::new(document.edit_version);
        self.published_status = SaveStatus::Saved;
    }

    /// Stops tracking the active document.
    ///
    /// Cancels the debounce timer and forgets any in-flight write, whose
    /// response will then be ignored. An unresolved conflict is published
    /// as [`SyncEvent::ConflictAbandoned`] and returned.
    pub fn detach(&mut self) -> Option<ConflictRecord> {
        self.timer.cancel();
        self.in_flight = None;
        self.save_due = false;
        if let Some(reply) = self.resolution_reply.take() {
            let _ = reply.send(Err(SyncError::NoActiveDocument));
        }

        let document_id = self.document_id.take()?;
        if self.machine.state() == &SaveState::PendingSave {
            tracing::warn!(%document_id, "document closed with unsaved changes");
        }
        let abandoned = self.machine.conflict().cloned();
        if let Some(record) = &abandoned {
            tracing::warn!(%document_id, "document closed with an unresolved conflict");
            self.events.publish(SyncEvent::ConflictAbandoned {
                document_id,
                record: record.clone(),
            });
        }
        self.content.clear();
        self.machine = SaveStateMachine::default();
        abandoned
    }

    /// The attached document.
    #[must_use]
    pub const fn document_id(&self) -> Option<DocumentId> {
        self.document_id
    }

    /// Local content as last recorded.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Version the client believes the server stores.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.machine.version()
    }

    /// Save state.
    #[must_use]
    pub const fn state(&self) -> &SaveState {
        self.machine.state()
    }

    /// User-visible save status.
    #[must_use]
    pub const fn status(&self) -> &SaveStatus {
        self.machine.status()
    }

    /// The unresolved conflict, if any.
    #[must_use]
    pub const fn conflict(&self) -> Option<&ConflictRecord> {
        self.machine.conflict()
    }

    /// Records a local edit and re-arms the debounce timer.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveDocument`] when detached.
    pub fn record_edit(&mut self, content: String) -> Result<(), SyncError> {
        let document_id = self.document_id.ok_or(SyncError::NoActiveDocument)?;
        self.content = content;
        self.edit_seq += 1;
        if self.machine.record_edit() {
            let notify = Arc::clone(&self.notify);
            self.timer.arm(self.debounce, move |ticket| {
                notify(AutosaveSignal::Due(ticket));
            });
        } else {
            tracing::debug!(%document_id, "autosave blocked by unresolved conflict");
        }
        self.publish_status();
        Ok(())
    }

    /// Routes a signal produced by this coordinator's timers and writes.
    pub fn on_signal(&mut self, signal: AutosaveSignal) {
        match signal {
            AutosaveSignal::Due(ticket) => self.on_timer(ticket),
            AutosaveSignal::Finished(report) => self.on_save_finished(report),
        }
    }

    /// Handles the debounce timer firing.
    pub fn on_timer(&mut self, ticket: Ticket) {
        if !self.timer.claim(ticket) {
            return;
        }
        if self.in_flight.is_some() {
            self.save_due = true;
            return;
        }
        self.start_save();
    }

    fn start_save(&mut self) {
        self.save_due = false;
        match self.machine.begin_save() {
            Ok(expected) => {
                self.spawn_write(Some(expected), WriteKind::Autosave);
                self.publish_status();
            }
            Err(e) => tracing::debug!(error = %e, "nothing to save"),
        }
    }

    fn spawn_write(&mut self, expected_version: Option<u64>, kind: WriteKind) {
        let Some(document_id) = self.document_id else {
            return;
        };
        self.next_request += 1;
        let request = self.next_request;
        self.in_flight = Some(InFlight {
            request,
            edit_seq: self.edit_seq,
            kind,
        });

        let update = DocumentUpdate {
            content: self.content.clone(),
            expected_version,
            author: self.author.clone(),
        };
        tracing::debug!(%document_id, request, ?expected_version, "writing document");

        let store = Arc::clone(&self.store);
        let notify = Arc::clone(&self.notify);
        tokio::spawn(async move {
            let result = store.update(document_id, update).await;
            notify(AutosaveSignal::Finished(SaveReport {
                document_id,
                request,
                result,
            }));
        });
    }

    /// Handles the completion of a write.
    pub fn on_save_finished(&mut self, report: SaveReport) {
        let current = self
            .in_flight
            .filter(|f| f.request == report.request && self.document_id == Some(report.document_id));
        let Some(flight) = current else {
            tracing::debug!(
                document_id = %report.document_id,
                request = report.request,
                "ignoring response for superseded write"
            );
            return;
        };
        self.in_flight = None;

        match flight.kind {
            WriteKind::Autosave => self.finish_autosave(report.document_id, flight, report.result),
            WriteKind::Force => self.finish_force(report.document_id, flight, report.result),
        }
        self.publish_status();
    }

    fn finish_autosave(
        &mut self,
        document_id: DocumentId,
        flight: InFlight,
        result: Result<Document, StoreError>,
    ) {
        match result {
            Ok(document) => {
                let still_dirty = self.edit_seq != flight.edit_seq;
                self.machine
                    .save_succeeded(document.edit_version, still_dirty);
                tracing::info!(%document_id, version = document.edit_version, "document saved");
                if still_dirty && self.save_due {
                    self.start_save();
                }
            }
            Err(StoreError::Conflict(details)) => {
                let details = *details;
                self.timer.cancel();
                self.save_due = false;
                let record = ConflictRecord {
                    local_content: self.content.clone(),
                    server_content: details.server_content,
                    server_version: details.current_version,
                };
                if let Err(e) = self.machine.save_conflicted(record.clone()) {
                    tracing::warn!(error = %e, "conflict arrived in unexpected state");
                    return;
                }
                tracing::info!(
                    %document_id,
                    expected = ?details.expected_version,
                    current = details.current_version,
                    "save conflict detected"
                );
                self.events.publish(SyncEvent::ConflictDetected {
                    document_id,
                    record,
                });
            }
            Err(e) => {
                tracing::warn!(%document_id, error = %e, "save failed; local content kept");
                self.machine.save_failed(e.to_string());
                if self.save_due {
                    self.start_save();
                }
            }
        }
    }

    fn finish_force(
        &mut self,
        document_id: DocumentId,
        flight: InFlight,
        result: Result<Document, StoreError>,
    ) {
        let reply = self.resolution_reply.take();
        match result {
            Ok(document) => {
                let version = document.edit_version;
                if let Err(e) = self.machine.resolution_succeeded(version) {
                    tracing::warn!(error = %e, "force write finished in unexpected state");
                }
                tracing::info!(%document_id, version, "conflict resolved keeping local content");
                self.events.publish(SyncEvent::ConflictResolved {
                    document_id,
                    resolution: Resolution::KeepLocal,
                    version,
                });
                if self.edit_seq != flight.edit_seq {
                    let _ = self.record_edit(self.content.clone());
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(version));
                }
            }
            Err(e) => {
                tracing::warn!(%document_id, error = %e, "force write failed; conflict kept");
                self.machine.resolution_failed();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e.into()));
                }
            }
        }
    }

    /// Applies an explicit resolution to the unresolved conflict.
    ///
    /// `AcceptServer` completes immediately: the local buffer and version
    /// become the server's, the new content is returned so the caller can
    /// update the editor, and `reply` receives the adopted version.
    /// `KeepLocal` force-writes the current local content; `reply` receives
    /// the new version once the write completes.
    pub fn resolve(&mut self, resolution: Resolution, reply: ResolutionReply) -> Option<String> {
        let Some(document_id) = self.document_id else {
            let _ = reply.send(Err(SyncError::NoActiveDocument));
            return None;
        };
        let record = match self.machine.resolve(resolution) {
            Ok(record) => record,
            Err(e) => {
                let _ = reply.send(Err(e));
                return None;
            }
        };

        match resolution {
            Resolution::AcceptServer => {
                self.timer.cancel();
                self.content = record.server_content;
                self.edit_seq += 1;
                let version = self.machine.version();
                tracing::info!(%document_id, version, "conflict resolved accepting server content");
                self.events.publish(SyncEvent::ConflictResolved {
                    document_id,
                    resolution,
                    version,
                });
                self.publish_status();
                let _ = reply.send(Ok(version));
                Some(self.content.clone())
            }
            Resolution::KeepLocal => {
                self.resolution_reply = Some(reply);
                self.spawn_write(None, WriteKind::Force);
                self.publish_status();
                None
            }
        }
    }

    /// Replaces the local buffer with content received from a remote editor.
    /// Does not schedule a save.
    pub fn adopt_remote(&mut self, content: String) {
        self.content = content;
    }

    /// Adopts a version advertised by the server for content identical to
    /// the local buffer. Returns `true` if the version was adopted.
    ///
    /// Refused while a write is in flight, while conflicted, or when the
    /// content differs: the next save then surfaces the mismatch instead.
    pub fn adopt_server_version(
        &mut self,
        document_id: DocumentId,
        content: &str,
        version: u64,
    ) -> bool {
        let adoptable = self.document_id == Some(document_id)
            && self.in_flight.is_none()
            && !self.machine.is_blocked()
            && content == self.content
            && version > self.machine.version();
        if adoptable {
            tracing::debug!(%document_id, version, "adopted server version");
            self.machine.adopt_version(version);
        }
        adoptable
    }

    /// Adopts a reverted document: pending work is dropped and the
    /// coordinator is clean at the document's version.
    pub fn apply_revert(&mut self, document: &Document) {
        if self.document_id != Some(document.id) {
            return;
        }
        self.timer.cancel();
        self.in_flight = None;
        self.save_due = false;
        if let Some(record) = self.machine.conflict().cloned() {
            self.events.publish(SyncEvent::ConflictAbandoned {
                document_id: document.id,
                record,
            });
        }
        if let Some(reply) = self.resolution_reply.take() {
            let _ = reply.send(Err(SyncError::InvalidTransition {
                action: "finish resolution",
                state: "reverted",
            }));
        }
        self.content.clone_from(&document.content);
        self.edit_seq += 1;
        self.machine.reset(document.edit_version);
        self.publish_status();
    }

    fn publish_status(&mut self) {
        let Some(document_id) = self.document_id else {
            return;
        };
        let status = self.machine.status();
        if *status != self.published_status {
            self.published_status = status.clone();
            self.events.publish(SyncEvent::SaveStatusChanged {
                document_id,
                status: status.clone(),
            });
        }
    }
}
