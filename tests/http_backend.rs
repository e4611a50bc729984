//! `HttpInferenceBackend` against a mock inference service.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support_chat::relay::{
    build_request, collect, spawn_relay, BackendError, HttpInferenceBackend, InferenceBackend, RelayOptions,
    RelayOutcome, ThinkRender, UpstreamReply,
};

const SEND_PATH: &str = "/backend/api/send";

async fn backend(server: &MockServer) -> Arc<HttpInferenceBackend> {
    Arc::new(HttpInferenceBackend::new(format!("{}{}", server.uri(), SEND_PATH)))
}

#[tokio::test]
async fn test_streams_sse_body() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"chunk\":\"Hello\"}\n\n",
        "data: {\"chunk\":\" <think>why</think>there\"}\n\n",
        "data: {\"done\":true}\n\n",
    );
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "context": "hi\nhow are you", "content": "help me" })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let request = build_request(["hi", "how are you", "help me"]).unwrap();
    let options = RelayOptions {
        render: ThinkRender::Raw,
        ..RelayOptions::default()
    };
    let (stream, handle) = spawn_relay(backend(&server).await, request, options);

    assert_eq!(collect(stream).await, "Hello <think>why</think>there");
    assert_eq!(handle.await.unwrap(), RelayOutcome::Completed);
}

#[tokio::test]
async fn test_json_reply_is_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "<think>x</think>Done." })))
        .mount(&server)
        .await;

    let reply = backend(&server)
        .await
        .open(build_request(["q"]).unwrap())
        .await
        .unwrap();
    match reply {
        UpstreamReply::Complete(text) => assert_eq!(text, "<think>x</think>Done."),
        other => panic!("expected a complete reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_json_without_response_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .await
        .open(build_request(["q"]).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::MissingBody));
}

#[tokio::test]
async fn test_server_error_becomes_error_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (stream, handle) = spawn_relay(backend(&server).await, build_request(["q"]).unwrap(), RelayOptions::default());

    assert_eq!(collect(stream).await, "Error: 500 Internal Server Error");
    assert_eq!(
        handle.await.unwrap(),
        RelayOutcome::UpstreamFailed("500 Internal Server Error".into())
    );
}

#[tokio::test]
async fn test_unreachable_backend_reports_error() {
    // Nothing listens on the discard port.
    let backend = Arc::new(HttpInferenceBackend::new("http://127.0.0.1:9/backend/api/send"));
    let (stream, handle) = spawn_relay(backend, build_request(["q"]).unwrap(), RelayOptions::default());

    let text = collect(stream).await;
    assert!(text.starts_with("Error: upstream request failed"), "{text}");
    assert!(matches!(handle.await.unwrap(), RelayOutcome::UpstreamFailed(_)));
}
