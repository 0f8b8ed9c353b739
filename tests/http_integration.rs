//! HTTP provider integration tests
//!
//! Runs the HTTP provider and the stream consumer against an in-process
//! axum agent server on a local socket.

use a3s_bridge::{
    AgentProvider, Bridge, BridgeConfig, BridgeError, ConversationStatus, EventKind, EventSource,
    HttpConfig, HttpProvider, InteractionAnswer, MemoryPresenter, PermissionReply,
    StreamConsumer,
};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    body: String,
}

/// Fake agent server
///
/// The first `/event` connection streams the events pushed through the
/// sender returned by `spawn_server` and ends when it is dropped; later
/// connections stay open and silent.
#[derive(Clone)]
struct FakeServer {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    event_connects: Arc<AtomicUsize>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<SseEvent>>>>,
}

impl FakeServer {
    async fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().await.clone()
    }

    async fn find(&self, target: &str) -> Option<Recorded> {
        self.requests()
            .await
            .into_iter()
            .find(|r| r.target == target)
    }

    async fn record(&self, method: &Method, uri: &Uri, body: String) {
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());
        self.requests.lock().await.push(Recorded {
            method: method.to_string(),
            target,
            body,
        });
    }
}

async fn create_session(
    State(server): State<FakeServer>,
    method: Method,
    uri: Uri,
    body: String,
) -> impl IntoResponse {
    server.record(&method, &uri, body).await;
    Json(serde_json::json!({ "id": "ses_http_1" }))
}

async fn prompt_async(
    State(server): State<FakeServer>,
    Path(session_id): Path<String>,
    method: Method,
    uri: Uri,
    body: String,
) -> impl IntoResponse {
    server.record(&method, &uri, body).await;
    if session_id == "ses_broken" {
        (StatusCode::INTERNAL_SERVER_ERROR, "model offline").into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn acknowledge(
    State(server): State<FakeServer>,
    method: Method,
    uri: Uri,
    body: String,
) -> impl IntoResponse {
    server.record(&method, &uri, body).await;
    Json(true)
}

async fn event_stream(
    State(server): State<FakeServer>,
    method: Method,
    uri: Uri,
) -> Sse<BoxStream<'static, Result<SseEvent, Infallible>>> {
    server.record(&method, &uri, String::new()).await;
    server.event_connects.fetch_add(1, Ordering::SeqCst);

    let events: BoxStream<'static, Result<SseEvent, Infallible>> =
        match server.events.lock().await.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).map(Ok).boxed(),
            None => stream::pending().boxed(),
        };
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn spawn_server() -> (FakeServer, mpsc::UnboundedSender<SseEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let server = FakeServer {
        base_url: format!("http://{}", addr),
        requests: Arc::new(Mutex::new(Vec::new())),
        event_connects: Arc::new(AtomicUsize::new(0)),
        events: Arc::new(Mutex::new(Some(rx))),
    };

    let app = Router::new()
        .route("/event", get(event_stream))
        .route("/session", post(create_session))
        .route("/session/:id/prompt_async", post(prompt_async))
        .route("/session/:id/abort", post(acknowledge))
        .route("/permission/:id/reply", post(acknowledge))
        .route("/question/:id/reply", post(acknowledge))
        .route("/question/:id/reject", post(acknowledge))
        .with_state(server.clone());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (server, tx)
}

fn frame(event_type: &str, properties: serde_json::Value) -> SseEvent {
    SseEvent::default()
        .data(serde_json::json!({ "type": event_type, "properties": properties }).to_string())
}

fn provider_for(server: &FakeServer) -> Arc<HttpProvider> {
    let config = HttpConfig {
        directory: Some("/repo".to_string()),
        ..HttpConfig::new(server.base_url.clone())
    };
    Arc::new(HttpProvider::new(config).unwrap())
}

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        debounce_ms: 20,
        backoff_initial_ms: 20,
        backoff_max_ms: 100,
        ..Default::default()
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

// ─── Requests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_session_and_prompt() {
    let (server, _events) = spawn_server().await;
    let provider = provider_for(&server);

    let session = provider.create_session(Some("chat1")).await.unwrap();
    assert_eq!(session, "ses_http_1");
    provider.send_request(&session, "hello").await.unwrap();

    let create = server.find("/session?directory=%2Frepo").await.unwrap();
    assert_eq!(create.method, "POST");
    let body: serde_json::Value = serde_json::from_str(&create.body).unwrap();
    assert_eq!(body["title"], "chat1");

    let prompt = server
        .find("/session/ses_http_1/prompt_async?directory=%2Frepo")
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&prompt.body).unwrap();
    assert_eq!(body["parts"][0]["type"], "text");
    assert_eq!(body["parts"][0]["text"], "hello");
}

#[tokio::test]
async fn test_replies_route_by_kind() {
    let (server, _events) = spawn_server().await;
    let provider = provider_for(&server);

    provider
        .reply_to_interaction(
            "per_1",
            &InteractionAnswer::Permission {
                reply: PermissionReply::Always,
            },
        )
        .await
        .unwrap();
    provider
        .reply_to_interaction(
            "que_1",
            &InteractionAnswer::Question {
                answers: vec![vec!["Rust".to_string()]],
            },
        )
        .await
        .unwrap();
    provider
        .reply_to_interaction("que_2", &InteractionAnswer::Dismiss)
        .await
        .unwrap();
    tokio_test::assert_ok!(provider.abort("ses_http_1").await);

    let permission = server
        .find("/permission/per_1/reply?directory=%2Frepo")
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&permission.body).unwrap();
    assert_eq!(body["reply"], "always");

    let question = server
        .find("/question/que_1/reply?directory=%2Frepo")
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&question.body).unwrap();
    assert_eq!(body["answers"], serde_json::json!([["Rust"]]));

    assert!(server.find("/question/que_2/reject?directory=%2Frepo").await.is_some());
    assert!(server.find("/session/ses_http_1/abort?directory=%2Frepo").await.is_some());
}

#[tokio::test]
async fn test_error_status_carries_body() {
    let (server, _events) = spawn_server().await;
    let provider = provider_for(&server);

    let err = provider.send_request("ses_broken", "hi").await.unwrap_err();
    match err {
        BridgeError::Agent(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("model offline"));
        }
        other => panic!("expected agent error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = HttpProvider::new(HttpConfig::new(format!("http://{}", addr))).unwrap();
    let err = match provider.open().await {
        Ok(_) => panic!("expected the stream to fail"),
        Err(e) => e,
    };
    assert!(matches!(err, BridgeError::Connection(_)));
}

// ─── Event Stream ────────────────────────────────────────────────

#[tokio::test]
async fn test_consumer_decodes_and_reconnects() {
    let (server, events) = spawn_server().await;
    let provider = provider_for(&server);
    let consumer = StreamConsumer::new(provider, &fast_config());

    let cancel = CancellationToken::new();
    consumer.connect(&cancel).await.unwrap();
    let mut rx = consumer.events().await.unwrap();

    events
        .send(SseEvent::default().comment("keep-alive"))
        .unwrap();
    events
        .send(frame("server.connected", serde_json::json!({})))
        .unwrap();
    events
        .send(frame("session.idle", serde_json::json!({"sessionID": "ses_http_1"})))
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, EventKind::Other);
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.kind, EventKind::Idle);
    assert_eq!(second.session_id(), Some("ses_http_1"));

    drop(events);
    let connects = server.event_connects.clone();
    eventually(|| {
        let connects = connects.clone();
        async move { connects.load(Ordering::SeqCst) >= 2 }
    })
    .await;
    assert!(consumer.stats().connects >= 2);

    consumer.close().await;
}

// ─── Bridge ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_bridge_over_http() {
    let (server, events) = spawn_server().await;
    let provider = provider_for(&server);
    let presenter = Arc::new(MemoryPresenter::new());

    let bridge = Bridge::from_provider(fast_config(), provider, presenter.clone()).unwrap();
    bridge.start().await.unwrap();

    bridge.handle_input("chat1", "hi there").await.unwrap();
    let srv = server.clone();
    eventually(|| {
        let srv = srv.clone();
        async move {
            srv.find("/session/ses_http_1/prompt_async?directory=%2Frepo")
                .await
                .is_some()
        }
    })
    .await;

    events
        .send(frame(
            "message.part.updated",
            serde_json::json!({
                "part": {"id": "prt_1", "sessionID": "ses_http_1", "messageID": "msg_1",
                         "type": "text", "text": "Hi!"},
                "delta": "Hi!"
            }),
        ))
        .unwrap();
    events
        .send(frame("session.idle", serde_json::json!({"sessionID": "ses_http_1"})))
        .unwrap();

    let p = presenter.clone();
    eventually(|| {
        let p = p.clone();
        async move { p.message_text("m1").await.as_deref() == Some("Hi!") }
    })
    .await;
    let state = bridge.conversation("chat1").await.unwrap();
    assert_eq!(state.status, ConversationStatus::Idle);

    bridge.shutdown().await;
}
