//! Session/Room Controller: which document is active and whether its room
//! has been joined.
//!
//! Leaving the previous document before joining the next is the caller's
//! job. A transport drop counts as an implicit leave: the session is marked
//! not joined and [`SessionController::rejoin`] re-sends the join once the
//! channel is back.

use super::connection::ConnectionManager;
use crate::domain::{DocumentId, SyncEvent};
use crate::protocol::{ClientFrame, ServerFrame};

/// The locally active document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSession {
    /// Active document.
    pub document_id: DocumentId,
    /// Whether a join signal is outstanding for the current channel.
    pub joined: bool,
}

/// Tracks the active document and sends join/leave signals.
#[derive(Debug)]
pub struct SessionController {
    connection: ConnectionManager,
    active: Option<DocumentSession>,
}

impl SessionController {
    /// Creates a controller sending through `connection`.
    #[must_use]
    pub const fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            active: None,
        }
    }

    /// Sends a join signal for `document_id` and makes it the active
    /// document. Returns `false` if it is already joined.
    pub fn join(&mut self, document_id: DocumentId) -> bool {
        if let Some(session) = self.active {
            if session.document_id == document_id && session.joined {
                tracing::debug!(%document_id, "already joined");
                return false;
            }
            if session.document_id != document_id {
                tracing::debug!(
                    previous = %session.document_id,
                    %document_id,
                    "switching documents without a leave"
                );
            }
        }
        self.connection.send(&ClientFrame::JoinDocument { document_id });
        self.active = Some(DocumentSession {
            document_id,
            joined: true,
        });
        tracing::info!(%document_id, "joined document");
        true
    }

    /// Sends a leave signal for `document_id`. Safe to call when not joined.
    pub fn leave(&mut self, document_id: DocumentId) {
        self.connection.send(&ClientFrame::LeaveDocument { document_id });
        if self.is_active(document_id) {
            self.active = None;
            tracing::info!(%document_id, "left document");
        }
    }

    /// The active document, if any.
    #[must_use]
    pub fn active(&self) -> Option<DocumentId> {
        self.active.map(|s| s.document_id)
    }

    /// The active session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<DocumentSession> {
        self.active
    }

    /// Returns `true` if `document_id` is the active document.
    #[must_use]
    pub fn is_active(&self, document_id: DocumentId) -> bool {
        self.active() == Some(document_id)
    }

    /// Marks the active session as not joined after a transport drop.
    pub fn mark_disconnected(&mut self) {
        if let Some(session) = &mut self.active {
            session.joined = false;
        }
    }

    /// Re-sends the join for an active session that is not joined.
    /// Returns `true` if a join was sent.
    pub fn rejoin(&mut self) -> bool {
        match self.active {
            Some(session) if !session.joined => self.join(session.document_id),
            _ => false,
        }
    }

    /// Translates a `user_joined`/`user_left` frame for the active
    /// document into its upstream event. Presence traffic for any other
    /// document, and every other frame, yields `None`.
    #[must_use]
    pub fn presence_event(&self, frame: &ServerFrame) -> Option<SyncEvent> {
        match frame {
            ServerFrame::UserJoined {
                document_id,
                user_id,
                username,
                active_users,
            } if self.is_active(*document_id) => Some(SyncEvent::PresenceJoined {
                document_id: *document_id,
                user_id: user_id.clone(),
                username: username.clone(),
                active_users: active_users.clone(),
            }),
            ServerFrame::UserLeft {
                document_id,
                user_id,
                ..
            } if self.is_active(*document_id) => Some(SyncEvent::PresenceLeft {
                document_id: *document_id,
                user_id: user_id.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::super::connection::{Connector, ReconnectPolicy};
    use super::super::testing::{Peer, ScriptedConnector, forward};
    use super::*;
    use crate::domain::UserId;

    async fn connected() -> (SessionController, Peer) {
        let connector = ScriptedConnector::accepting();
        let manager = ConnectionManager::spawn(
            Arc::clone(&connector) as Arc<dyn Connector>,
            ReconnectPolicy::default(),
        );
        let (_sub, mut rx) = forward(&manager, "connected");
        manager.connect("tok");
        let _ = rx.recv().await;
        let Some(peer) = connector.next_peer().await else {
            panic!("no peer");
        };
        (SessionController::new(manager), peer)
    }

    #[tokio::test]
    async fn join_is_sent_once_until_left() {
        let (mut session, mut peer) = connected().await;
        let doc = DocumentId::new();

        assert!(session.join(doc));
        assert!(!session.join(doc));
        session.leave(doc);
        assert!(session.active().is_none());
        assert!(session.join(doc));

        let types: Vec<String> = [
            peer.next_frame().await,
            peer.next_frame().await,
            peer.next_frame().await,
        ]
        .into_iter()
        .flatten()
        .filter_map(|f| f["type"].as_str().map(str::to_string))
        .collect();
        assert_eq!(types, vec!["join_document", "leave_document", "join_document"]);
    }

    #[tokio::test]
    async fn leave_without_join_still_signals() {
        let (mut session, mut peer) = connected().await;
        let doc = DocumentId::new();
        session.leave(doc);
        let Some(frame) = peer.next_frame().await else {
            panic!("no frame");
        };
        assert_eq!(frame["type"], "leave_document");
        assert_eq!(frame["document_id"], doc.to_string());
    }

    #[tokio::test]
    async fn rejoin_after_drop_resends_join() {
        let (mut session, mut peer) = connected().await;
        let doc = DocumentId::new();
        session.join(doc);
        let _ = peer.next_frame().await;

        assert!(!session.rejoin());
        session.mark_disconnected();
        assert_eq!(
            session.session(),
            Some(DocumentSession {
                document_id: doc,
                joined: false
            })
        );
        assert!(session.rejoin());

        let Some(frame) = peer.next_frame().await else {
            panic!("no rejoin");
        };
        assert_eq!(frame["type"], "join_document");
    }

    #[tokio::test]
    async fn presence_is_translated_for_the_active_document_only() {
        let (mut session, _peer) = connected().await;
        let doc = DocumentId::new();
        let joined = ServerFrame::UserJoined {
            document_id: doc,
            user_id: UserId::from("bob"),
            username: "Bob".to_string(),
            active_users: Vec::new(),
        };
        assert!(session.presence_event(&joined).is_none());

        session.join(doc);
        let Some(SyncEvent::PresenceJoined { user_id, username, .. }) =
            session.presence_event(&joined)
        else {
            panic!("expected join");
        };
        assert_eq!(user_id.as_str(), "bob");
        assert_eq!(username, "Bob");

        let left = ServerFrame::UserLeft {
            document_id: doc,
            user_id: UserId::from("bob"),
            username: None,
            active_users: Vec::new(),
        };
        let Some(SyncEvent::PresenceLeft { document_id, .. }) = session.presence_event(&left) else {
            panic!("expected leave");
        };
        assert_eq!(document_id, doc);
        assert!(session.presence_event(&ServerFrame::Pong).is_none());
    }
}
