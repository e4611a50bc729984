//! `ChatClient` against a live server on a random port.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use common::{sse_chunk, ChannelBackend, RecordingMailer, ScriptedBackend};
use support_chat::client::{ChatClient, ClientError};
use support_chat::config::{AppConfig, RelayTimeouts};
use support_chat::relay::InferenceBackend;
use support_chat::server::{router, AppState};
use support_chat::store::{Role, SqliteStore};

async fn serve(backend: Arc<dyn InferenceBackend>) -> (SocketAddr, NamedTempFile) {
    let db = NamedTempFile::new().unwrap();
    let config = AppConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        database_path: db.path().to_path_buf(),
        session_secret: "client-tests".into(),
        backend_url: String::new(),
        app_url: "http://localhost".into(),
        cookie_secure: false,
        relay: RelayTimeouts::default(),
        log_dir: None,
    };
    let store = SqliteStore::new(db.path()).await.unwrap();
    let state = AppState::new(config, Arc::new(store), backend, Arc::new(RecordingMailer::default()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router(state)).await });
    (addr, db)
}

async fn logged_in(addr: SocketAddr, name: &str) -> ChatClient {
    let mut client = ChatClient::new(format!("http://{addr}"));
    let email = format!("{name}@example.com");
    client.register(name, &email, "secret-pw").await.unwrap();
    client.login(&email, "secret-pw").await.unwrap();
    client
}

#[tokio::test]
async fn test_send_streams_and_persists() {
    let backend = ScriptedBackend::chunks(&["Your ", "order ", "shipped."]);
    let (addr, _db) = serve(backend).await;
    let client = logged_in(addr, "pat").await;

    let mut updates = Vec::new();
    let outcome = client
        .send(None, &[], "where is my order", |t| updates.push(t.to_string()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.assistant_message.content, "Your order shipped.");
    assert_eq!(updates.last().map(String::as_str), Some("Your order shipped."));
    assert!(updates.windows(2).all(|w| w[1].starts_with(&w[0])));

    let messages = client.list_messages(&outcome.chat_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Your order shipped.");

    let chats = client.list_chats(1).await.unwrap();
    assert_eq!(chats.list.len(), 1);
    assert_eq!(chats.list[0].id, outcome.chat_id);
}

#[tokio::test]
async fn test_cancel_keeps_partial_reply() {
    let (backend, upstream) = ChannelBackend::new();
    let (addr, _db) = serve(backend).await;
    let client = logged_in(addr, "quinn").await;

    upstream.send(Ok(Bytes::from(sse_chunk("Let me check")))).await.unwrap();

    let cancel = CancellationToken::new();
    let outcome = client
        .send(None, &[], "status?", |_| cancel.cancel(), &cancel)
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.assistant_message.content, "Let me check");

    let messages = client.list_messages(&outcome.chat_id).await.unwrap();
    assert_eq!(messages[1].content, "Let me check");
    drop(upstream);
}

#[tokio::test]
async fn test_errors_surface_as_api_errors() {
    let (addr, _db) = serve(ScriptedBackend::chunks(&["hi"])).await;

    let anonymous = ChatClient::new(format!("http://{addr}"));
    assert!(matches!(anonymous.list_chats(1).await, Err(ClientError::NoSession)));

    let client = logged_in(addr, "rita").await;
    match client.list_messages("missing-chat").await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Chat not found");
        }
        other => panic!("expected 404, got {other:?}"),
    }

    let mut wrong = ChatClient::new(format!("http://{addr}"));
    assert!(matches!(
        wrong.login("rita@example.com", "nope").await,
        Err(ClientError::Api { status: 401, .. })
    ));
}
