//! Relay side of one WebSocket connection.
//!
//! Runs the read/write loop: inbound frames are applied to the room
//! registry and fanned out through the room event bus; room events are
//! forwarded to the socket when this connection is a member of the room
//! and not the event's origin.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;

use super::events::RoomEvent;
use super::membership::Membership;
use super::rooms::ConnectionId;
use crate::app_state::AppState;
use crate::domain::{DocumentId, Participant, UserId};
use crate::protocol::{ClientFrame, ServerFrame};

/// Error code for frames that are not JSON objects.
pub const MALFORMED_FRAME: u16 = 400;

/// Error code for room traffic sent without joining the room.
pub const NOT_JOINED: u16 = 403;

/// Error code for frames of an unknown type.
pub const UNKNOWN_TYPE: u16 = 404;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Participant identifier.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
}

/// State of one connection as seen by the frame handler.
#[derive(Debug)]
pub struct ConnectionContext {
    /// This connection.
    pub connection: ConnectionId,
    /// The connected user.
    pub identity: ClientIdentity,
    /// Rooms this connection joined.
    pub membership: Membership,
}

impl ConnectionContext {
    /// Creates the context of a fresh connection.
    #[must_use]
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            connection: ConnectionId::new(),
            identity,
            membership: Membership::new(),
        }
    }

    fn participant(&self) -> Participant {
        Participant::new(self.identity.user_id.clone(), self.identity.username.clone())
    }
}

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads frames from the client and applies them.
/// - Forwards matching room events from the [`broadcast::Receiver`].
/// - On exit, leaves every joined room and notifies the remaining members.
pub async fn run_connection(socket: WebSocket, identity: ClientIdentity, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut event_rx = state.room_events.subscribe();
    let mut ctx = ConnectionContext::new(identity);
    state.rooms.connection_opened();
    tracing::info!(
        connection = %ctx.connection,
        user_id = %ctx.identity.user_id,
        "relay connection opened"
    );

    let greeting = ServerFrame::Connected {
        user_id: Some(ctx.identity.user_id.clone()),
        message: Some("Connected to collaborative editing server".to_string()),
    };
    let mut open = send_frame(&mut ws_tx, &greeting).await;

    while open {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for reply in handle_text(text.as_str(), &mut ctx, &state).await {
                            if !send_frame(&mut ws_tx, &reply).await {
                                open = false;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => open = false,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if ctx.membership.matches(event.document_id)
                            && event.is_for(ctx.connection, &ctx.identity.user_id)
                        {
                            open = send_frame(&mut ws_tx, &event.frame).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "relay connection lagged behind room events");
                    }
                    Err(broadcast::error::RecvError::Closed) => open = false,
                }
            }
        }
    }

    for (document_id, change) in state.rooms.leave_all(ctx.connection).await {
        state.room_events.publish(RoomEvent::to_room(
            document_id,
            ServerFrame::UserLeft {
                document_id,
                user_id: change.participant.user_id,
                username: Some(change.participant.username),
                active_users: change.active_users,
            },
        ));
    }
    state.rooms.connection_closed();
    tracing::info!(connection = %ctx.connection, "relay connection closed");
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let Ok(json) = serde_json::to_string(frame) else {
        return true;
    };
    ws_tx.send(Message::text(json)).await.is_ok()
}

/// Applies one text frame from the client and returns the frames to send
/// back to it directly.
pub async fn handle_text(text: &str, ctx: &mut ConnectionContext, state: &AppState) -> Vec<ServerFrame> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return vec![error(MALFORMED_FRAME, "malformed JSON")];
    };
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let frame = match serde_json::from_value::<ClientFrame>(value) {
        Ok(frame) => frame,
        Err(e) if is_client_type(&event_type) => {
            tracing::debug!(event_type, error = %e, "rejecting invalid frame");
            return vec![error(MALFORMED_FRAME, &format!("invalid {event_type} frame"))];
        }
        Err(_) => {
            tracing::warn!(event_type, "unknown message type");
            return vec![error(UNKNOWN_TYPE, "unknown message type")];
        }
    };

    match frame {
        ClientFrame::JoinDocument { document_id } => join(document_id, ctx, state).await,
        ClientFrame::LeaveDocument { document_id } => {
            leave(document_id, ctx, state).await;
            Vec::new()
        }
        ClientFrame::TextChange {
            document_id,
            change,
        } => {
            if !ctx.membership.matches(document_id) {
                return vec![not_joined(document_id)];
            }
            state.room_events.publish(RoomEvent::from_connection(
                document_id,
                ctx.connection,
                ServerFrame::TextChange {
                    document_id,
                    user_id: Some(ctx.identity.user_id.clone()),
                    username: Some(ctx.identity.username.clone()),
                    change,
                    timestamp: Some(Utc::now()),
                },
            ));
            Vec::new()
        }
        ClientFrame::CursorUpdate {
            document_id,
            position,
            selection_start,
            selection_end,
        } => {
            if !ctx.membership.matches(document_id) {
                return vec![not_joined(document_id)];
            }
            state.room_events.publish(RoomEvent::from_connection(
                document_id,
                ctx.connection,
                ServerFrame::CursorUpdate {
                    document_id,
                    user_id: ctx.identity.user_id.clone(),
                    position,
                    selection_start,
                    selection_end,
                    username: ctx.identity.username.clone(),
                    color: ctx.identity.user_id.color(),
                },
            ));
            Vec::new()
        }
        ClientFrame::Ping => vec![ServerFrame::Pong],
    }
}

async fn join(document_id: DocumentId, ctx: &mut ConnectionContext, state: &AppState) -> Vec<ServerFrame> {
    ctx.membership.join(document_id);
    let change = state
        .rooms
        .join(document_id, ctx.connection, ctx.participant())
        .await;
    tracing::info!(%document_id, user_id = %ctx.identity.user_id, "user joined document");

    state.room_events.publish(RoomEvent::from_connection(
        document_id,
        ctx.connection,
        ServerFrame::UserJoined {
            document_id,
            user_id: change.participant.user_id,
            username: change.participant.username,
            active_users: change.active_users.clone(),
        },
    ));
    vec![ServerFrame::RoomInfo {
        document_id,
        active_users: change.active_users,
    }]
}

async fn leave(document_id: DocumentId, ctx: &mut ConnectionContext, state: &AppState) {
    ctx.membership.leave(document_id);
    let Some(change) = state.rooms.leave(document_id, ctx.connection).await else {
        tracing::debug!(%document_id, "leave for a room that was not joined");
        return;
    };
    tracing::info!(%document_id, user_id = %ctx.identity.user_id, "user left document");
    state.room_events.publish(RoomEvent::to_room(
        document_id,
        ServerFrame::UserLeft {
            document_id,
            user_id: change.participant.user_id,
            username: Some(change.participant.username),
            active_users: change.active_users,
        },
    ));
}

fn is_client_type(event_type: &str) -> bool {
    matches!(
        event_type,
        "join_document" | "leave_document" | "text_change" | "cursor_update" | "ping"
    )
}

fn error(code: u16, message: &str) -> ServerFrame {
    ServerFrame::Error {
        code,
        message: message.to_string(),
    }
}

fn not_joined(document_id: DocumentId) -> ServerFrame {
    error(NOT_JOINED, &format!("document {document_id} not joined"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context(user: &str) -> ConnectionContext {
        ConnectionContext::new(ClientIdentity {
            user_id: UserId::from(user),
            username: user.to_uppercase(),
        })
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_get_errors() {
        let state = AppState::new(16);
        let mut ctx = context("alice");

        let replies = handle_text("{not json", &mut ctx, &state).await;
        assert!(matches!(replies.as_slice(), [ServerFrame::Error { code: 400, .. }]));

        let replies = handle_text(r#"{"type":"dance"}"#, &mut ctx, &state).await;
        assert!(matches!(replies.as_slice(), [ServerFrame::Error { code: 404, .. }]));

        let replies = handle_text(r#"{"type":"join_document"}"#, &mut ctx, &state).await;
        assert!(matches!(replies.as_slice(), [ServerFrame::Error { code: 400, .. }]));
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let state = AppState::new(16);
        let mut ctx = context("alice");
        let replies = handle_text(r#"{"type":"ping"}"#, &mut ctx, &state).await;
        assert_eq!(replies, vec![ServerFrame::Pong]);
    }

    #[tokio::test]
    async fn join_notifies_room_and_answers_room_info() {
        let state = AppState::new(16);
        let mut events = state.room_events.subscribe();
        let doc = DocumentId::new();
        let mut bob = context("bob");
        let mut alice = context("alice");

        let join = json!({"type": "join_document", "document_id": doc}).to_string();
        let _ = handle_text(&join, &mut bob, &state).await;
        let replies = handle_text(&join, &mut alice, &state).await;

        let [ServerFrame::RoomInfo { active_users, .. }] = replies.as_slice() else {
            panic!("expected room info");
        };
        assert_eq!(active_users.len(), 2);

        let _ = events.recv().await;
        let Ok(event) = events.recv().await else {
            panic!("expected user_joined");
        };
        assert!(matches!(&event.frame, ServerFrame::UserJoined { user_id, .. } if user_id.as_str() == "alice"));
        assert!(!event.is_for(alice.connection, &alice.identity.user_id));
        assert!(event.is_for(bob.connection, &bob.identity.user_id));
    }

    #[tokio::test]
    async fn text_change_is_enriched_and_excludes_sender() {
        let state = AppState::new(16);
        let doc = DocumentId::new();
        let mut alice = context("alice");
        let join = json!({"type": "join_document", "document_id": doc}).to_string();
        let _ = handle_text(&join, &mut alice, &state).await;

        let mut events = state.room_events.subscribe();
        let change = json!({
            "type": "text_change",
            "document_id": doc,
            "change": {"type": "replace", "position": 0, "content": "hi", "length": 0},
        });
        assert!(handle_text(&change.to_string(), &mut alice, &state).await.is_empty());

        let event = tokio_test::assert_ok!(events.recv().await);
        let ServerFrame::TextChange {
            user_id, username, change, ..
        } = &event.frame
        else {
            panic!("expected text change frame");
        };
        assert_eq!(user_id.as_ref().map(UserId::as_str), Some("alice"));
        assert_eq!(username.as_deref(), Some("ALICE"));
        assert_eq!(change.content, "hi");
        assert!(!event.is_for(alice.connection, &alice.identity.user_id));
    }

    #[tokio::test]
    async fn cursor_update_carries_user_color() {
        let state = AppState::new(16);
        let doc = DocumentId::new();
        let mut alice = context("alice");
        let join = json!({"type": "join_document", "document_id": doc}).to_string();
        let _ = handle_text(&join, &mut alice, &state).await;

        let mut events = state.room_events.subscribe();
        let cursor = json!({"type": "cursor_update", "document_id": doc, "position": 3,
                            "selection_start": null, "selection_end": null});
        let _ = handle_text(&cursor.to_string(), &mut alice, &state).await;

        let event = tokio_test::assert_ok!(events.recv().await);
        let ServerFrame::CursorUpdate { color, position, .. } = event.frame else {
            panic!("expected cursor frame");
        };
        assert_eq!(position, 3);
        assert_eq!(color, "hsl(150, 70%, 50%)");
    }

    #[tokio::test]
    async fn room_traffic_requires_join() {
        let state = AppState::new(16);
        let mut ctx = context("alice");
        let frame = json!({"type": "cursor_update", "document_id": DocumentId::new(), "position": 0});
        let replies = handle_text(&frame.to_string(), &mut ctx, &state).await;
        assert!(matches!(replies.as_slice(), [ServerFrame::Error { code: 403, .. }]));
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members() {
        let state = AppState::new(16);
        let doc = DocumentId::new();
        let mut alice = context("alice");
        let join = json!({"type": "join_document", "document_id": doc}).to_string();
        let _ = handle_text(&join, &mut alice, &state).await;

        let mut events = state.room_events.subscribe();
        let leave = json!({"type": "leave_document", "document_id": doc}).to_string();
        assert!(handle_text(&leave, &mut alice, &state).await.is_empty());
        assert!(!alice.membership.matches(doc));

        let Ok(event) = events.recv().await else {
            panic!("expected user_left");
        };
        assert!(matches!(event.frame, ServerFrame::UserLeft { username: Some(ref name), .. } if name == "ALICE"));
        assert_eq!(state.rooms.stats().await.document_rooms, 0);
    }
}
