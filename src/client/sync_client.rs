//! [`SyncClient`]: the sync components driven by one actor task.
//!
//! The actor exclusively owns the session controller, the edit channel and
//! the save coordinator, so none of them needs a lock. Everything that
//! happens elsewhere (inbound frames on the connection driver, debounce
//! timers, finished saves) is turned into a message on the actor's signal
//! queue and applied in arrival order. Round-trips to the persistence
//! collaborator that do not touch local state run on the caller's task.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::autosave::{AutosaveSignal, ResolutionReply, SaveCoordinator};
use super::conflict::SaveState;
use super::connection::{ConnectionManager, Connector};
use super::dispatcher::Subscription;
use super::propagation::{EditChannel, LocalCursor, PropagationStrategy, WholeBufferReplace};
use super::scheduler::Ticket;
use super::session::{DocumentSession, SessionController};
use super::transport::WsConnector;
use crate::config::ClientConfig;
use crate::domain::{
    ConflictRecord, ConnectionState, Contribution, Document, DocumentId, EventBus, RemoteCursor,
    Resolution, SaveStatus, SyncEvent, UserId, VersionMeta, VersionRecord,
};
use crate::error::SyncError;
use crate::persistence::{
    CheckpointRequest, DocumentStore, HttpDocumentStore, RevertRequest,
};
use crate::protocol::{InboundFrame, ServerFrame};

/// Inbound frame types the actor consumes, in arrival order.
const FRAME_TYPES: [&str; 9] = [
    "connected",
    "reconnecting",
    "disconnected",
    "error",
    "text_change",
    "cursor_update",
    "user_joined",
    "user_left",
    "document_updated",
];

/// Point-in-time view of the client state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSnapshot {
    /// Connection lifecycle state.
    pub connection: ConnectionState,
    /// Active document and whether its room is joined.
    pub session: Option<DocumentSession>,
    /// Local buffer of the active document.
    pub content: String,
    /// Version the client believes the server stores.
    pub version: u64,
    /// Save state.
    pub save_state: SaveState,
    /// User-visible save indicator.
    pub save_status: SaveStatus,
    /// Remote cursors of the active document, ordered by user id.
    pub cursors: Vec<RemoteCursor>,
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect {
        permanent: bool,
    },
    Attach {
        document: Document,
        reply: oneshot::Sender<()>,
    },
    Close {
        document_id: DocumentId,
        reply: oneshot::Sender<Option<ConflictRecord>>,
    },
    Edit {
        content: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    MoveCursor(LocalCursor),
    Resolve {
        resolution: Resolution,
        reply: ResolutionReply,
    },
    ApplyRevert {
        document: Document,
        version_number: u32,
    },
    Snapshot(oneshot::Sender<ClientSnapshot>),
}

#[derive(Debug)]
enum Signal {
    Frame(InboundFrame),
    CursorDue(Ticket),
    Autosave(AutosaveSignal),
}

/// Handle to a running sync core. Cheap to clone; the actor stops when the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct SyncClient {
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus<SyncEvent>,
    connection: ConnectionManager,
    store: Arc<dyn DocumentStore>,
    author: Option<UserId>,
}

impl SyncClient {
    /// Starts a client that talks to the relay and REST API named in
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SyncError> {
        let connector = WsConnector::new(config.ws_url.clone())
            .with_identity(config.user_id.clone(), config.username.clone());
        let mut store = HttpDocumentStore::new(config.api_url.clone())?;
        if let Some(token) = &config.api_token {
            store = store.with_token(token.clone());
        }
        Ok(Self::start(config, Arc::new(connector), Arc::new(store)))
    }

    /// Starts a client with whole-buffer propagation.
    #[must_use]
    pub fn start(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::start_with_strategy(config, connector, store, Box::new(WholeBufferReplace))
    }

    /// Starts a client that shapes text changes with `strategy`.
    #[must_use]
    pub fn start_with_strategy(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn DocumentStore>,
        strategy: Box<dyn PropagationStrategy>,
    ) -> Self {
        let connection = ConnectionManager::spawn(connector, config.reconnect_policy());
        let events = EventBus::new(config.event_bus_capacity);
        let author = config.user_id.clone().map(UserId::from);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let cursor_signals = signals_tx.clone();
        let edits = EditChannel::new(
            connection.clone(),
            strategy,
            config.cursor_debounce,
            Arc::new(move |ticket| {
                let _ = cursor_signals.send(Signal::CursorDue(ticket));
            }),
        );
        let autosave_signals = signals_tx.clone();
        let autosave = SaveCoordinator::new(
            Arc::clone(&store),
            events.clone(),
            Arc::new(move |signal| {
                let _ = autosave_signals.send(Signal::Autosave(signal));
            }),
            config.autosave_debounce,
            author.clone(),
        );

        let mut actor = ClientActor {
            connection: connection.clone(),
            session: SessionController::new(connection.clone()),
            edits,
            autosave,
            events: events.clone(),
            signals: signals_tx,
            frames: Vec::new(),
        };
        actor.ensure_subscribed();
        tokio::spawn(actor.run(commands_rx, signals_rx));

        Self {
            commands: commands_tx,
            events,
            connection,
            store,
            author,
        }
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ClientStopped)
    }

    /// Receives every [`SyncEvent`] published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The underlying connection, e.g. for custom frame subscriptions.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Current connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Opens the connection with `token`. No-op while already open or
    /// connecting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the actor is gone.
    pub fn connect(&self, token: impl Into<String>) -> Result<(), SyncError> {
        self.send(Command::Connect(token.into()))
    }

    /// Closes the connection. A permanent disconnect stops reconnection and
    /// drops every frame subscription until the next [`SyncClient::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the actor is gone.
    pub fn disconnect(&self, permanent: bool) -> Result<(), SyncError> {
        self.send(Command::Disconnect { permanent })
    }

    /// Loads `document_id`, makes it the active document and joins its
    /// room. A previously active document is closed first.
    ///
    /// # Errors
    ///
    /// Returns the store failure if the document cannot be loaded.
    pub async fn open_document(&self, document_id: DocumentId) -> Result<Document, SyncError> {
        let document = self.store.get(document_id).await?;
        let (reply, done) = oneshot::channel();
        self.send(Command::Attach {
            document: document.clone(),
            reply,
        })?;
        done.await.map_err(|_| SyncError::ClientStopped)?;
        Ok(document)
    }

    /// Leaves `document_id`. If it was active, pending debounce timers are
    /// cancelled and an unresolved conflict is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the actor is gone.
    pub async fn close_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<ConflictRecord>, SyncError> {
        let (reply, abandoned) = oneshot::channel();
        self.send(Command::Close { document_id, reply })?;
        abandoned.await.map_err(|_| SyncError::ClientStopped)
    }

    /// Records the new local buffer: broadcasts it and schedules autosave.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveDocument`] if no document is open.
    pub async fn edit(&self, content: impl Into<String>) -> Result<(), SyncError> {
        let (reply, result) = oneshot::channel();
        self.send(Command::Edit {
            content: content.into(),
            reply,
        })?;
        result.await.map_err(|_| SyncError::ClientStopped)?
    }

    /// Records a local caret/selection move; broadcast after the cursor
    /// debounce window.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the actor is gone.
    pub fn move_cursor(&self, cursor: LocalCursor) -> Result<(), SyncError> {
        self.send(Command::MoveCursor(cursor))
    }

    /// Resolves the active document's conflict. Returns the version the
    /// client believes current afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] if there is no unresolved
    /// conflict, or the store failure of a keep-local write.
    pub async fn resolve_conflict(&self, resolution: Resolution) -> Result<u64, SyncError> {
        let (reply, version) = oneshot::channel();
        self.send(Command::Resolve { resolution, reply })?;
        version.await.map_err(|_| SyncError::ClientStopped)?
    }

    /// Creates a checkpoint of the stored content of `document_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoChanges`] if the content equals the latest
    /// checkpoint.
    pub async fn create_checkpoint(
        &self,
        document_id: DocumentId,
        change_summary: Option<String>,
    ) -> Result<VersionRecord, SyncError> {
        let record = self
            .store
            .create_version(
                document_id,
                CheckpointRequest {
                    change_summary,
                    author: self.author.clone(),
                },
            )
            .await?;
        tracing::info!(%document_id, version = record.version_number, "checkpoint created");
        Ok(record)
    }

    /// Restores checkpoint `version_number`. If the document is active, the
    /// local buffer adopts the restored content and pending autosave work is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::VersionNotFound`] for an unknown checkpoint.
    pub async fn revert(
        &self,
        document_id: DocumentId,
        version_number: u32,
    ) -> Result<Document, SyncError> {
        let document = self
            .store
            .revert(
                document_id,
                RevertRequest {
                    version_number,
                    author: self.author.clone(),
                },
            )
            .await?;
        tracing::info!(%document_id, version_number, "document reverted");
        self.send(Command::ApplyRevert {
            document: document.clone(),
            version_number,
        })?;
        Ok(document)
    }

    /// Checkpoint metadata of `document_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store failure.
    pub async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>, SyncError> {
        Ok(self.store.list_versions(document_id).await?)
    }

    /// Per-user contribution statistics of `document_id`.
    ///
    /// # Errors
    ///
    /// Returns the store failure.
    pub async fn contributions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Contribution>, SyncError> {
        Ok(self.store.contributions(document_id).await?)
    }

    /// Current client state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClientStopped`] if the actor is gone.
    pub async fn snapshot(&self) -> Result<ClientSnapshot, SyncError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        snapshot.await.map_err(|_| SyncError::ClientStopped)
    }
}

struct ClientActor {
    connection: ConnectionManager,
    session: SessionController,
    edits: EditChannel,
    autosave: SaveCoordinator,
    events: EventBus<SyncEvent>,
    signals: mpsc::UnboundedSender<Signal>,
    frames: Vec<Subscription>,
}

impl ClientActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(signal) = signals.recv() => self.on_signal(signal),
            }
        }

        let _ = self.close_active();
        self.connection.disconnect(true);
        tracing::debug!("sync client stopped");
    }

    /// Subscribes to inbound frames unless a permanent disconnect revoked
    /// the previous subscriptions.
    fn ensure_subscribed(&mut self) {
        if self.frames.is_empty() || !self.frames.iter().all(Subscription::is_active) {
            self.frames = FRAME_TYPES
                .iter()
                .map(|event_type| {
                    let signals = self.signals.clone();
                    let name = (*event_type).to_string();
                    self.connection.subscribe(*event_type, move |payload: &Value| {
                        signals
                            .send(Signal::Frame(InboundFrame {
                                event_type: name.clone(),
                                payload: payload.clone(),
                            }))
                            .map_err(|_| anyhow::anyhow!("sync client stopped"))
                    })
                })
                .collect();
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(token) => {
                self.ensure_subscribed();
                self.connection.connect(token);
            }
            Command::Disconnect { permanent } => self.connection.disconnect(permanent),
            Command::Attach { document, reply } => {
                self.attach(&document);
                let _ = reply.send(());
            }
            Command::Close { document_id, reply } => {
                let abandoned = if self.session.is_active(document_id) {
                    self.close_active()
                } else {
                    self.session.leave(document_id);
                    None
                };
                let _ = reply.send(abandoned);
            }
            Command::Edit { content, reply } => {
                let _ = reply.send(self.local_edit(content));
            }
            Command::MoveCursor(cursor) => self.edits.local_cursor(cursor),
            Command::Resolve { resolution, reply } => {
                if let Some(content) = self.autosave.resolve(resolution, reply) {
                    self.replace_buffer(content);
                }
            }
            Command::ApplyRevert {
                document,
                version_number,
            } => self.apply_revert(&document, version_number),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn attach(&mut self, document: &Document) {
        if let Some(active) = self.session.active() {
            if active == document.id {
                tracing::debug!(document_id = %document.id, "document already open");
                return;
            }
            let _ = self.close_active();
        }
        self.session.join(document.id);
        self.edits.attach(document.id, document.content.clone());
        self.autosave.attach(document);
    }

    fn close_active(&mut self) -> Option<ConflictRecord> {
        let document_id = self.session.active()?;
        self.session.leave(document_id);
        self.edits.detach();
        self.autosave.detach()
    }

    fn local_edit(&mut self, content: String) -> Result<(), SyncError> {
        if self.session.active().is_none() {
            return Err(SyncError::NoActiveDocument);
        }
        if content == self.autosave.content() {
            return Ok(());
        }
        self.edits.local_edit(content.clone());
        self.autosave.record_edit(content)
    }

    /// Replaces the local buffer with server-side content and broadcasts it
    /// to the room.
    fn replace_buffer(&mut self, content: String) {
        let Some(document_id) = self.session.active() else {
            return;
        };
        self.edits.broadcast_buffer(content.clone());
        self.events
            .publish(SyncEvent::RemoteContent { document_id, content });
    }

    fn apply_revert(&mut self, document: &Document, version_number: u32) {
        if !self.session.is_active(document.id) {
            return;
        }
        self.autosave.apply_revert(document);
        self.replace_buffer(document.content.clone());
        self.events.publish(SyncEvent::Reverted {
            document_id: document.id,
            version_number,
            version: document.edit_version,
        });
    }

    fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            connection: self.connection.state(),
            session: self.session.session(),
            content: self.autosave.content().to_string(),
            version: self.autosave.version(),
            save_state: self.autosave.state().clone(),
            save_status: self.autosave.status().clone(),
            cursors: self.edits.cursors(),
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Frame(frame) => self.on_frame(frame),
            Signal::CursorDue(ticket) => {
                self.edits.flush_cursor(ticket);
            }
            Signal::Autosave(signal) => self.autosave.on_signal(signal),
        }
    }

    fn on_frame(&mut self, frame: InboundFrame) {
        let parsed = match serde_json::from_value::<ServerFrame>(frame.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(event_type = %frame.event_type, error = %e, "dropping malformed frame");
                return;
            }
        };

        if let Some(event) = self.session.presence_event(&parsed) {
            self.events.publish(event);
        }

        match parsed {
            ServerFrame::Connected { .. } => {
                self.events.publish(SyncEvent::Connected);
                if self.session.rejoin() {
                    tracing::info!("rejoined active document after reconnect");
                }
            }
            ServerFrame::Reconnecting {
                attempt, delay_ms, ..
            } => {
                self.session.mark_disconnected();
                self.events
                    .publish(SyncEvent::Reconnecting { attempt, delay_ms });
            }
            ServerFrame::Disconnected { code, reason } => {
                self.session.mark_disconnected();
                self.events.publish(SyncEvent::Offline { code, reason });
            }
            ServerFrame::Error { message, .. } => {
                self.events.publish(SyncEvent::ServerError { message });
            }
            ServerFrame::TextChange {
                document_id,
                change,
                ..
            } => {
                if let Some(content) = self.edits.apply_remote(document_id, &change) {
                    self.autosave.adopt_remote(content.clone());
                    self.events
                        .publish(SyncEvent::RemoteContent { document_id, content });
                }
            }
            ServerFrame::CursorUpdate {
                document_id,
                user_id,
                position,
                selection_start,
                selection_end,
                username,
                color,
            } => {
                let color = if color.is_empty() { user_id.color() } else { color };
                let cursor = RemoteCursor {
                    user_id,
                    position,
                    selection_start,
                    selection_end,
                    display_name: username,
                    color,
                    last_updated: Utc::now(),
                };
                if self.edits.remote_cursor(document_id, cursor) {
                    self.publish_cursors(document_id);
                }
            }
            ServerFrame::UserLeft {
                document_id,
                user_id,
                ..
            } => {
                if self.edits.remote_left(document_id, &user_id) {
                    self.publish_cursors(document_id);
                }
            }
            ServerFrame::DocumentUpdated {
                document_id,
                version,
                content: Some(content),
                ..
            } => {
                self.autosave
                    .adopt_server_version(document_id, &content, version);
            }
            ServerFrame::DocumentUpdated { .. }
            | ServerFrame::UserJoined { .. }
            | ServerFrame::RoomInfo { .. }
            | ServerFrame::Pong => {}
        }
    }

    fn publish_cursors(&self, document_id: DocumentId) {
        self.events.publish(SyncEvent::CursorsChanged {
            document_id,
            cursors: self.edits.cursors(),
        });
    }
}
