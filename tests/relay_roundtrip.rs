//! End-to-end tests: a live relay on an ephemeral port driven by raw
//! WebSocket/HTTP clients and by two [`SyncClient`]s.
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use collab_sync::api::build_app;
use collab_sync::app_state::AppState;
use collab_sync::client::SyncClient;
use collab_sync::config::ClientConfig;
use collab_sync::domain::{Document, SyncEvent};
use collab_sync::persistence::{DocumentStore, HttpDocumentStore, NewDocument};

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_relay() -> SocketAddr {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local address");
    };
    let app = build_app(AppState::new(256), Duration::from_secs(5));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn create_document(addr: SocketAddr, content: &str) -> Document {
    let Ok(store) = HttpDocumentStore::new(format!("http://{addr}")) else {
        panic!("http client");
    };
    let request = NewDocument {
        title: "Shared".to_string(),
        content: content.to_string(),
        author: None,
    };
    let Ok(document) = store.create(&request).await else {
        panic!("create failed");
    };
    document
}

fn client(addr: SocketAddr, user: &str) -> SyncClient {
    let config = ClientConfig {
        ws_url: format!("ws://{addr}/ws"),
        api_url: format!("http://{addr}"),
        user_id: Some(user.to_string()),
        username: Some(user.to_uppercase()),
        autosave_debounce: Duration::from_millis(100),
        cursor_debounce: Duration::from_millis(10),
        ..ClientConfig::default()
    };
    let Ok(client) = SyncClient::from_config(&config) else {
        panic!("client construction failed");
    };
    client
}

async fn next_matching<F>(events: &mut broadcast::Receiver<SyncEvent>, mut pred: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;
    let Ok(Some(event)) = found else {
        panic!("timed out waiting for event");
    };
    event
}

async fn next_text(
    stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Value {
    loop {
        let Ok(Some(Ok(message))) = tokio::time::timeout(WAIT, stream.next()).await else {
            panic!("socket closed while waiting for a frame");
        };
        if let Message::Text(text) = message {
            let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                panic!("relay sent malformed JSON");
            };
            return value;
        }
    }
}

#[tokio::test]
async fn missing_token_is_closed_with_4001() {
    let addr = spawn_relay().await;
    let Ok((mut socket, _)) = connect_async(format!("ws://{addr}/ws")).await else {
        panic!("handshake failed");
    };
    let Ok(Some(Ok(Message::Close(Some(frame))))) = tokio::time::timeout(WAIT, socket.next()).await
    else {
        panic!("expected close frame");
    };
    assert_eq!(u16::from(frame.code), 4001);
    assert_eq!(frame.reason.as_str(), "Invalid token");
}

#[tokio::test]
async fn raw_socket_gets_greeting_room_info_and_pong() {
    let addr = spawn_relay().await;
    let document = create_document(addr, "").await;
    let Ok((socket, _)) = connect_async(format!("ws://{addr}/ws?token=t&user_id=alice")).await
    else {
        panic!("handshake failed");
    };
    let (mut sink, mut stream) = socket.split();

    let greeting = next_text(&mut stream).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["user_id"], "alice");

    let join = json!({"type": "join_document", "document_id": document.id});
    let _ = sink.send(Message::text(join.to_string())).await;
    let info = next_text(&mut stream).await;
    assert_eq!(info["type"], "room_info");
    assert_eq!(info["active_users"][0]["user_id"], "alice");

    let _ = sink.send(Message::text(r#"{"type":"ping"}"#)).await;
    assert_eq!(next_text(&mut stream).await["type"], "pong");

    let _ = sink.send(Message::text(r#"{"type":"shout"}"#)).await;
    let error = next_text(&mut stream).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], 404);
}

#[tokio::test]
async fn stale_rest_update_returns_conflict_body() {
    let addr = spawn_relay().await;
    let document = create_document(addr, "base").await;
    let http = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/documents/{}", document.id);

    let Ok(ok) = http
        .put(&url)
        .json(&json!({"content": "next", "expected_version": document.edit_version}))
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(ok.status(), reqwest::StatusCode::OK);

    let Ok(stale) = http
        .put(&url)
        .json(&json!({"content": "late", "expected_version": document.edit_version}))
        .send()
        .await
    else {
        panic!("request failed");
    };
    assert_eq!(stale.status(), reqwest::StatusCode::CONFLICT);
    let Ok(body) = stale.json::<Value>().await else {
        panic!("undecodable body");
    };
    assert_eq!(body["error"]["conflict"]["server_content"], "next");

    let versions = format!("{url}/versions");
    let Ok(first) = http.post(&versions).json(&json!({})).send().await else {
        panic!("request failed");
    };
    assert_eq!(first.status(), reqwest::StatusCode::CREATED);
    let Ok(second) = http.post(&versions).json(&json!({})).send().await else {
        panic!("request failed");
    };
    assert_eq!(second.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn edits_reach_peer_and_are_autosaved() {
    let addr = spawn_relay().await;
    let document = create_document(addr, "start").await;
    let alice = client(addr, "alice");
    let bob = client(addr, "bob");
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    let _ = alice.connect("alice-token");
    let _ = bob.connect("bob-token");
    next_matching(&mut alice_events, |e| matches!(e, SyncEvent::Connected)).await;
    next_matching(&mut bob_events, |e| matches!(e, SyncEvent::Connected)).await;

    let Ok(opened) = alice.open_document(document.id).await else {
        panic!("alice open failed");
    };
    assert_eq!(opened.content, "start");
    let Ok(_) = bob.open_document(document.id).await else {
        panic!("bob open failed");
    };
    next_matching(&mut alice_events, |e| {
        matches!(e, SyncEvent::PresenceJoined { user_id, .. } if user_id.as_str() == "bob")
    })
    .await;

    let Ok(()) = alice.edit("hello from alice").await else {
        panic!("edit failed");
    };
    next_matching(&mut bob_events, |e| {
        matches!(e, SyncEvent::RemoteContent { content, .. } if content == "hello from alice")
    })
    .await;

    next_matching(&mut alice_events, |e| {
        matches!(
            e,
            SyncEvent::SaveStatusChanged {
                status: collab_sync::domain::SaveStatus::Saved,
                ..
            }
        )
    })
    .await;

    let Ok(store) = HttpDocumentStore::new(format!("http://{addr}")) else {
        panic!("http client");
    };
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let Ok(saved) = store.get(document.id).await else {
        panic!("fetch failed");
    };
    assert_eq!(saved.content, "hello from alice");
    assert!(saved.edit_version > document.edit_version);

    let Ok(snapshot) = bob.snapshot().await else {
        panic!("snapshot failed");
    };
    assert_eq!(snapshot.content, "hello from alice");
}
