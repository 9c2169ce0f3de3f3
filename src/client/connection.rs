//! Connection Manager: one logical channel with automatic reconnection.
//!
//! A [`ConnectionManager`] is a cheap, cloneable handle to a driver task
//! that exclusively owns the live [`Channel`]. Consumers never see the
//! channel itself: they enqueue frames through [`ConnectionManager::send`]
//! and observe inbound traffic and lifecycle through the shared
//! [`EventDispatcher`].
//!
//! # Lifecycle events
//!
//! | Type           | When                                                  |
//! |----------------|-------------------------------------------------------|
//! | `connected`    | handshake succeeded                                   |
//! | `reconnecting` | unexpected closure, a retry is scheduled              |
//! | `disconnected` | normal closure, explicit disconnect, or retry cap hit |
//! | `error`        | handshake failed                                      |
//!
//! # Reconnection
//!
//! An unexpected closure (any code but 1000) while a connection is desired
//! and fewer than `max_retries` retries have been made schedules attempt
//! `n` after `base_delay × n`. The cached token is reused.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;

use super::dispatcher::{EventDispatcher, Subscription};
use crate::domain::ConnectionState;
use crate::protocol::{ABNORMAL_CLOSURE, ClientFrame, InboundFrame, NORMAL_CLOSURE, ServerFrame};

/// Frames travelling from the manager to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Close the channel with the given code.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Events travelling from the transport to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame.
    Frame(String),
    /// The channel closed.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// An established bidirectional channel, as produced by a [`Connector`].
#[derive(Debug)]
pub struct Channel {
    /// Frames to send.
    pub outbound: mpsc::UnboundedSender<Outbound>,
    /// Frames and closure received.
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Failure to establish a channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// The handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Opens channels to the relay. The seam between the manager and the wire.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establishes a channel authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the channel cannot be established.
    async fn open(&self, token: &str) -> Result<Channel, TransportError>;
}

/// Linear backoff with a retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; attempt `n` waits `base_delay × n`.
    pub base_delay: Duration,
    /// Retries before giving up.
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_retries: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect { permanent: bool },
    Send(String),
}

/// Handle to the connection driver.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dispatcher: EventDispatcher,
}

impl ConnectionManager {
    /// Spawns the driver task and returns a handle to it.
    ///
    /// The driver stops once every handle has been dropped.
    #[must_use]
    pub fn spawn(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = EventDispatcher::new();

        let driver = Driver {
            connector,
            policy,
            dispatcher: dispatcher.clone(),
            state: state_tx,
            desired: false,
            retry_count: 0,
            token: None,
            channel: None,
            handshake: None,
            reconnect: None,
        };
        tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            state,
            dispatcher,
        }
    }

    /// Requests a connection. No-op while already open or connecting.
    pub fn connect(&self, token: impl Into<String>) {
        self.command(Command::Connect(token.into()));
    }

    /// Closes the channel with code 1000.
    ///
    /// A permanent disconnect also stops automatic reconnection and revokes
    /// every subscription on the dispatcher.
    pub fn disconnect(&self, permanent: bool) {
        self.command(Command::Disconnect { permanent });
    }

    /// Sends a frame. Silently dropped unless the channel is open.
    pub fn send(&self, frame: &ClientFrame) {
        match serde_json::to_string(frame) {
            Ok(text) => self.command(Command::Send(text)),
            Err(e) => tracing::warn!(error = %e, "failed to encode frame"),
        }
    }

    /// Sends an arbitrary `{type, ...payload}` frame.
    pub fn send_raw(&self, event_type: &str, payload: Value) {
        let mut frame = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        frame.insert("type".to_string(), Value::String(event_type.to_string()));
        self.command(Command::Send(Value::Object(frame).to_string()));
    }

    /// Registers a handler for inbound frames and lifecycle events.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(event_type, handler)
    }

    /// The dispatcher inbound frames are published on.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches lifecycle state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("connection driver stopped; command dropped");
        }
    }
}

type Handshake = Pin<Box<dyn Future<Output = Result<Channel, TransportError>> + Send>>;

struct Driver {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    desired: bool,
    retry_count: u32,
    token: Option<String>,
    channel: Option<Channel>,
    handshake: Option<Handshake>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                result = poll_handshake(&mut self.handshake) => {
                    self.handshake = None;
                    self.on_handshake(result);
                }
                event = next_event(&mut self.channel) => {
                    let event = event.unwrap_or(ChannelEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "channel dropped".to_string(),
                    });
                    self.on_channel_event(event);
                }
                () = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    tracing::info!(attempt = self.retry_count, "reconnecting");
                    self.start_handshake();
                }
            }
        }

        self.close_channel("client dropped");
        tracing::debug!("connection driver stopped");
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(token) => {
                self.token = Some(token);
                self.desired = true;
                match self.current() {
                    ConnectionState::Open | ConnectionState::Connecting => {
                        tracing::debug!("connect ignored; already {}", self.current().as_str());
                    }
                    _ => {
                        self.reconnect = None;
                        self.retry_count = 0;
                        self.start_handshake();
                    }
                }
            }
            Command::Disconnect { permanent } => self.on_disconnect(permanent),
            Command::Send(text) => match (&self.channel, self.current()) {
                (Some(channel), ConnectionState::Open) => {
                    if channel.outbound.send(Outbound::Text(text)).is_err() {
                        tracing::debug!("transport gone; frame dropped");
                    }
                }
                _ => tracing::debug!("channel not open; frame dropped"),
            },
        }
    }

    fn start_handshake(&mut self) {
        let Some(token) = self.token.clone() else {
            tracing::warn!("no cached token; cannot connect");
            return;
        };
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        self.handshake = Some(Box::pin(async move { connector.open(&token).await }));
    }

    fn on_handshake(&mut self, result: Result<Channel, TransportError>) {
        match result {
            Ok(channel) => {
                self.channel = Some(channel);
                self.retry_count = 0;
                self.set_state(ConnectionState::Open);
                tracing::info!("connection established");
                self.publish(&ServerFrame::Connected {
                    user_id: None,
                    message: None,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection attempt failed");
                self.publish(&ServerFrame::Error {
                    code: 0,
                    message: err.to_string(),
                });
                self.on_closed(ABNORMAL_CLOSURE, err.to_string());
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(text) => match InboundFrame::decode(&text) {
                Ok(frame) => {
                    self.dispatcher.publish_frame(&frame);
                }
                Err(e) => tracing::warn!(error = %e, "dropping undecodable frame"),
            },
            ChannelEvent::Closed { code, reason } => {
                self.channel = None;
                self.on_closed(code, reason);
            }
        }
    }

    fn on_closed(&mut self, code: u16, reason: String) {
        self.set_state(ConnectionState::Disconnected);

        let retry = self.desired
            && code != NORMAL_CLOSURE
            && self.retry_count < self.policy.max_retries;
        if retry {
            self.retry_count += 1;
            let delay = self.policy.delay_for(self.retry_count);
            tracing::info!(
                code,
                attempt = self.retry_count,
                delay_ms = delay.as_millis() as u64,
                "connection lost; scheduling reconnect"
            );
            self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            self.publish(&ServerFrame::Reconnecting {
                attempt: self.retry_count,
                delay_ms: delay.as_millis() as u64,
                code,
                reason,
            });
            return;
        }

        if code != NORMAL_CLOSURE && self.desired {
            tracing::warn!(code, retries = self.retry_count, "reconnect attempts exhausted");
        } else {
            tracing::info!(code, "connection closed");
        }
        self.publish(&ServerFrame::Disconnected { code, reason });
    }

    fn on_disconnect(&mut self, permanent: bool) {
        let was_active =
            self.channel.is_some() || self.handshake.is_some() || self.reconnect.is_some();
        self.handshake = None;
        self.reconnect = None;
        if permanent {
            self.desired = false;
        }

        if was_active {
            self.set_state(ConnectionState::Closing);
            self.close_channel("client disconnect");
            self.set_state(ConnectionState::Disconnected);
            tracing::info!(permanent, "disconnected on request");
            self.publish(&ServerFrame::Disconnected {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
            });
        }

        if permanent {
            self.dispatcher.clear();
        }
    }

    fn close_channel(&mut self, reason: &str) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
        }
    }

    fn publish(&self, frame: &ServerFrame) {
        let payload = frame.to_payload();
        let payload = if payload.is_null() {
            json!({ "type": frame.type_str() })
        } else {
            payload
        };
        self.dispatcher.publish(frame.type_str(), &payload);
    }
}

async fn poll_handshake(handshake: &mut Option<Handshake>) -> Result<Channel, TransportError> {
    match handshake {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_event(channel: &mut Option<Channel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.inbound.recv().await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::time::Instant;

    use super::super::testing::{ScriptedConnector, forward};
    use super::*;
    use crate::domain::DocumentId;

    fn manager(connector: &Arc<ScriptedConnector>) -> ConnectionManager {
        let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
        ConnectionManager::spawn(connector, ReconnectPolicy::default())
    }

    fn gaps(instants: &[Instant]) -> Vec<Duration> {
        instants
            .windows(2)
            .filter_map(|w| match w {
                [a, b] => Some(b.duration_since(*a)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_follows_linear_schedule_then_stops() {
        let connector = ScriptedConnector::failing();
        let manager = manager(&connector);
        let (_retry, mut reconnecting) = forward(&manager, "reconnecting");
        let (_done, mut disconnected) = forward(&manager, "disconnected");

        manager.connect("token-1");
        let Some(terminal) = disconnected.recv().await else {
            panic!("no terminal disconnect");
        };
        assert_eq!(terminal["code"], ABNORMAL_CLOSURE);

        let secs: Vec<u64> = gaps(&connector.attempts()).iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![3, 6, 9, 12, 15]);

        let mut attempts = Vec::new();
        while let Ok(event) = reconnecting.try_recv() {
            attempts.push((event["attempt"].as_u64(), event["delay_ms"].as_u64()));
        }
        assert_eq!(
            attempts,
            (1..=5u64).map(|n| (Some(n), Some(n * 3000))).collect::<Vec<_>>()
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts().len(), 6);
        assert_eq!(connector.tokens(), vec!["token-1".to_string(); 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_after_open_reconnects_with_cached_token() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");

        manager.connect("tok");
        let _ = connected.recv().await;
        let Some(peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        peer.close(1011, "server restart");

        let _ = connected.recv().await;
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(gaps(&connector.attempts()), vec![Duration::from_secs(3)]);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_closure_is_not_retried() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");
        let (_d, mut disconnected) = forward(&manager, "disconnected");

        manager.connect("tok");
        let _ = connected.recv().await;
        let Some(peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        peer.close(NORMAL_CLOSURE, "bye");

        let Some(event) = disconnected.recv().await else {
            panic!("no disconnect");
        };
        assert_eq!(event["code"], NORMAL_CLOSURE);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");

        manager.connect("tok");
        manager.connect("tok");
        let _ = connected.recv().await;
        manager.connect("tok");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(connector.attempts().len(), 1);
        assert!(connected.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_sent_while_closed_are_dropped() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");

        manager.send(&ClientFrame::JoinDocument {
            document_id: DocumentId::new(),
        });
        manager.connect("tok");
        let _ = connected.recv().await;
        manager.send(&ClientFrame::Ping);

        let Some(mut peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        let Some(first) = peer.next_frame().await else {
            panic!("nothing sent");
        };
        assert_eq!(first["type"], "ping");
    }

    #[tokio::test(start_paused = true)]
    async fn raw_frames_merge_type_into_payload() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");

        manager.connect("tok");
        let _ = connected.recv().await;
        manager.send_raw("annotate", serde_json::json!({"line": 3, "note": "typo"}));
        manager.send_raw("ping", Value::Null);
        manager.send_raw("nudge", serde_json::json!(7));

        let Some(mut peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        let mut frames = Vec::new();
        for _ in 0..3 {
            let Some(frame) = peer.next_frame().await else {
                panic!("frame missing");
            };
            frames.push(frame);
        }
        assert_eq!(
            frames,
            vec![
                serde_json::json!({"type": "annotate", "line": 3, "note": "typo"}),
                serde_json::json!({"type": "ping"}),
                serde_json::json!({"type": "nudge", "data": 7}),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_subscribers_verbatim() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (_c, mut connected) = forward(&manager, "connected");
        let (_v, mut custom) = forward(&manager, "version_created");

        manager.connect("tok");
        let _ = connected.recv().await;
        let Some(peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        peer.push(r#"{"type":"version_created","version_number":4}"#);
        peer.push("not json");

        let Some(event) = custom.recv().await else {
            panic!("frame not delivered");
        };
        assert_eq!(event["version_number"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_disconnect_stops_retries_and_clears_subscriptions() {
        let connector = ScriptedConnector::accepting();
        let manager = manager(&connector);
        let (connected_sub, mut connected) = forward(&manager, "connected");

        manager.connect("tok");
        let _ = connected.recv().await;
        let Some(mut peer) = connector.next_peer().await else {
            panic!("no peer");
        };

        manager.disconnect(true);
        let Some(Outbound::Close { code, .. }) = peer.next_outbound().await else {
            panic!("no close frame");
        };
        assert_eq!(code, NORMAL_CLOSURE);
        assert!(!connected_sub.is_active());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 1);
    }

    #[test]
    fn policy_delays_are_linear() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 9, 12, 15]);
    }
}
