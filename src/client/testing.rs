//! Test doubles for the client components.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::connection::{Channel, ChannelEvent, ConnectionManager, Connector, Outbound, TransportError};
use super::dispatcher::Subscription;
use crate::domain::{Contribution, Document, DocumentId, VersionMeta, VersionRecord};
use crate::persistence::{
    CheckpointRequest, DocumentStore, DocumentUpdate, InMemoryDocumentStore, NewDocument,
    RevertRequest, StoreError,
};

/// The relay end of a channel handed out by [`ScriptedConnector`].
pub(crate) struct Peer {
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Peer {
    /// Delivers a text frame to the client.
    pub(crate) fn push(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Frame(text.to_string()));
    }

    /// Delivers a serialized JSON frame to the client.
    pub(crate) fn push_json(&self, value: &Value) {
        self.push(&value.to_string());
    }

    /// Closes the channel from the relay side.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(ChannelEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next raw outbound item from the client.
    pub(crate) async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next outbound text frame, decoded.
    pub(crate) async fn next_frame(&mut self) -> Option<Value> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Text(text) => return serde_json::from_str(&text).ok(),
                Outbound::Close { .. } => return None,
            }
        }
    }

    /// Drains every outbound text frame already queued.
    pub(crate) fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(item) = self.outbound.try_recv() {
            if let Outbound::Text(text) = item
                && let Ok(value) = serde_json::from_str(&text)
            {
                frames.push(value);
            }
        }
        frames
    }
}

/// A [`Connector`] that records attempts and hands the relay ends to the test.
pub(crate) struct ScriptedConnector {
    fail: bool,
    attempts: Mutex<Vec<(Instant, String)>>,
    peers_tx: mpsc::UnboundedSender<Peer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Peer>>,
}

impl ScriptedConnector {
    fn build(fail: bool) -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            fail,
            attempts: Mutex::new(Vec::new()),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        })
    }

    /// Every handshake succeeds.
    pub(crate) fn accepting() -> Arc<Self> {
        Self::build(false)
    }

    /// Every handshake fails.
    pub(crate) fn failing() -> Arc<Self> {
        Self::build(true)
    }

    /// When each handshake started.
    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    /// Token presented by each handshake.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }

    /// Waits for the next successfully opened channel.
    pub(crate) async fn next_peer(&self) -> Option<Peer> {
        self.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, token: &str) -> Result<Channel, TransportError> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), token.to_string()));
        if self.fail {
            return Err(TransportError::Handshake("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = self.peers_tx.send(Peer {
            events: events_tx,
            outbound: outbound_rx,
        });
        Ok(Channel {
            outbound: outbound_tx,
            inbound: events_rx,
        })
    }
}

/// Forwards every payload of `event_type` into a channel.
pub(crate) fn forward(
    manager: &ConnectionManager,
    event_type: &str,
) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = manager.subscribe(event_type, move |payload| {
        tx.send(payload.clone())
            .map_err(|_| anyhow::anyhow!("receiver dropped"))
    });
    (sub, rx)
}

/// An [`InMemoryDocumentStore`] that records updates and can fail them.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    pub(crate) inner: InMemoryDocumentStore,
    updates: Mutex<Vec<DocumentUpdate>>,
    fail_updates: std::sync::atomic::AtomicBool,
}

impl RecordingStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seeds a document and returns it.
    pub(crate) async fn seed(&self, content: &str) -> Document {
        self.inner
            .create(NewDocument {
                title: "Draft".to_string(),
                content: content.to_string(),
                author: None,
            })
            .await
    }

    /// Every update received so far, failed ones included.
    pub(crate) fn updates(&self) -> Vec<DocumentUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes subsequent updates fail with a request error.
    pub(crate) fn fail_updates(&self, fail: bool) {
        self.fail_updates
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn get(&self, document_id: DocumentId) -> Result<Document, StoreError> {
        self.inner.get(document_id).await
    }

    async fn update(
        &self,
        document_id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, StoreError> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update.clone());
        if self.fail_updates.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Request("service unavailable".to_string()));
        }
        self.inner.update(document_id, update).await
    }

    async fn create_version(
        &self,
        document_id: DocumentId,
        request: CheckpointRequest,
    ) -> Result<VersionRecord, StoreError> {
        self.inner.create_version(document_id, request).await
    }

    async fn revert(
        &self,
        document_id: DocumentId,
        request: RevertRequest,
    ) -> Result<Document, StoreError> {
        self.inner.revert(document_id, request).await
    }

    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>, StoreError> {
        self.inner.list_versions(document_id).await
    }

    async fn contributions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Contribution>, StoreError> {
        self.inner.contributions(document_id).await
    }
}
