//! Axum WebSocket upgrade handler.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::connection::{ClientIdentity, run_connection};
use crate::app_state::AppState;
use crate::domain::UserId;

/// Close code sent when the connection carries no usable token.
pub const INVALID_TOKEN: u16 = 4001;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer token. Required and non-empty.
    pub token: Option<String>,
    /// Participant id. Defaults to the token.
    pub user_id: Option<String>,
    /// Display name. Defaults to the participant id.
    pub username: Option<String>,
}

impl ConnectParams {
    /// Resolves the identity of the connecting user, or `None` when the
    /// token is missing or blank.
    #[must_use]
    pub fn identity(self) -> Option<ClientIdentity> {
        let token = self.token.filter(|t| !t.trim().is_empty())?;
        let user_id = self
            .user_id
            .filter(|u| !u.is_empty())
            .unwrap_or(token);
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| user_id.clone());
        Some(ClientIdentity {
            user_id: UserId::from(user_id),
            username,
        })
    }
}

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match params.identity() {
        Some(identity) => ws.on_upgrade(move |socket| run_connection(socket, identity, state)),
        None => {
            tracing::warn!("rejecting relay connection without a token");
            ws.on_upgrade(reject)
        }
    }
}

async fn reject(mut socket: WebSocket) {
    let close = CloseFrame {
        code: INVALID_TOKEN,
        reason: Utf8Bytes::from_static("Invalid token"),
    };
    let _ = socket.send(Message::Close(Some(close))).await;
}
