//! WebSocket [`Connector`] backed by `tokio-tungstenite`.
//!
//! The auth token travels as the `token` query parameter of the upgrade
//! request. Each opened channel runs two pump tasks: one writes queued
//! [`Outbound`] items to the socket, the other turns socket messages into
//! [`ChannelEvent`]s and reports the closure code exactly once.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::connection::{Channel, ChannelEvent, Connector, Outbound, TransportError};
use crate::protocol::ABNORMAL_CLOSURE;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS: u16 = 1005;

/// Opens WebSocket channels to the relay.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    user_id: Option<String>,
    username: Option<String>,
}

impl WsConnector {
    /// Creates a connector for `url` (e.g. `ws://127.0.0.1:3000/ws`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            username: None,
        }
    }

    /// Announces an identity to the relay alongside the token.
    #[must_use]
    pub fn with_identity(mut self, user_id: Option<String>, username: Option<String>) -> Self {
        self.user_id = user_id;
        self.username = username;
        self
    }

    /// Builds the upgrade URL carrying `token` and the optional identity.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] if the base URL is invalid.
    pub fn endpoint(&self, token: &str) -> Result<Url, TransportError> {
        let mut params = vec![("token", token)];
        if let Some(user_id) = &self.user_id {
            params.push(("user_id", user_id.as_str()));
        }
        if let Some(username) = &self.username {
            params.push(("username", username.as_str()));
        }
        Url::parse_with_params(&self.url, &params)
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, token: &str) -> Result<Channel, TransportError> {
        let url = self.endpoint(token)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Text(text) => {
                        if sink.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let mut closure = None;
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(ChannelEvent::Frame(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        closure = Some(frame.map_or((NO_STATUS, String::new()), |f| {
                            (u16::from(f.code), f.reason.to_string())
                        }));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            let (code, reason) =
                closure.unwrap_or((ABNORMAL_CLOSURE, "connection lost".to_string()));
            let _ = inbound_tx.send(ChannelEvent::Closed { code, reason });
        });

        tracing::debug!(url = %self.url, "websocket channel opened");
        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
