//! Integration test: drives the axum router in-process and checks the
//! Streamable HTTP contract end to end:
//! - initialize creates a session and returns its id in `Mcp-Session-Id`
//! - stateless requests are answered without touching the registry
//! - a GET stream replays missed events and resumes from `Last-Event-ID`
//! - DELETE terminates a session; later requests for it are rejected
//! - shutdown ends live streams and refuses new sessions
//! - malformed requests are rejected with the right status and code

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, BodyDataStream};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mr_domain::config::Config;
use mr_domain::tool::{ApiError, ApiResponse, ClientFactory, CoreClient, Endpoint};
use mr_gateway::api;
use mr_gateway::bootstrap;
use mr_gateway::mcp::ToolCatalog;
use mr_gateway::state::AppState;

// ── Fake API ────────────────────────────────────────────────────────────

struct GetAccount;

#[async_trait]
impl Endpoint for GetAccount {
    fn id(&self) -> &str {
        "getAccount"
    }
    fn group(&self) -> &str {
        "accounts"
    }
    fn description(&self) -> Option<&str> {
        Some("Fetch one account")
    }
    fn request_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "accountId": { "type": "string" } },
            "required": ["accountId"],
        })
    }
    fn validate(&self, args: Value) -> Result<Value, Vec<Value>> {
        match args.get("accountId").and_then(Value::as_str) {
            Some(_) => Ok(args),
            None => Err(vec![json!({ "path": "accountId", "message": "is required" })]),
        }
    }
    async fn call(&self, _client: &CoreClient, mapped: Value) -> Result<ApiResponse, ApiError> {
        let id = mapped["accountId"].as_str().unwrap_or_default().to_owned();
        if id == "missing" {
            return Err(ApiError::Response {
                status_code: 404,
                headers: BTreeMap::new(),
                body: json!({ "error": "no such account" }),
            });
        }
        Ok(ApiResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: json!({ "id": id, "balance": 100 }),
        })
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

fn app() -> (Router, AppState) {
    let clients: Arc<dyn ClientFactory> = Arc::new(|| -> CoreClient { Arc::new(()) });
    let endpoints: Vec<Arc<dyn Endpoint>> = vec![Arc::new(GetAccount)];
    let catalog = ToolCatalog::new(endpoints, &[], clients).unwrap();
    let state = bootstrap::assemble(Arc::new(Config::default()), catalog);
    let router = api::router(&state).with_state(state.clone());
    (router, state)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn post(session: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json, text/event-stream");
    if let Some(id) = session {
        builder = builder.header("mcp-session-id", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(session: &str, last_event_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "text/event-stream")
        .header("mcp-session-id", session);
    if let Some(last) = last_event_id {
        builder = builder.header("last-event-id", last);
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(session: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("mcp-session-id", session)
        .body(Body::empty())
        .unwrap()
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }
    })
}

fn call_with_progress(id: i64, token: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": "get_account",
            "arguments": { "accountId": "acc-1" },
            "_meta": { "progressToken": token }
        }
    })
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initialize(app: &Router) -> String {
    let response = send(app, post(None, initialize_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers()["mcp-session-id"].to_str().unwrap().to_owned();
    let body = json_body(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = send(app, post(Some(&id), initialized)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    id
}

/// Incremental SSE reader over a response body.
struct EventReader {
    stream: BodyDataStream,
    buffer: String,
}

impl EventReader {
    fn new(response: Response) -> Self {
        Self {
            stream: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Next `(id, data)` event, skipping keep-alive comments.  `None` once
    /// the stream ended.
    async fn next(&mut self) -> Option<(u64, Value)> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut id = None;
                let mut data = None;
                for line in block.lines() {
                    if let Some(v) = line.strip_prefix("id:") {
                        id = v.trim().parse::<u64>().ok();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data = serde_json::from_str::<Value>(v.trim()).ok();
                    }
                }
                if let (Some(id), Some(data)) = (id, data) {
                    return Some((id, data));
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for SSE data")?;
            self.buffer.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
    }

    async fn ids(&mut self, n: usize) -> Vec<u64> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(self.next().await.expect("stream ended early").0);
        }
        ids
    }
}

// ── Scenario A: new session ─────────────────────────────────────────────

#[tokio::test]
async fn initialize_creates_session_and_stream_starts_at_one() {
    let (app, state) = app();
    let id = initialize(&app).await;
    assert_eq!(state.registry.len(), 1);
    assert!(state.registry.lookup(&id).is_ok());

    let response = send(&app, get(&id, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()["mcp-session-id"], id.as_str());
    let mut events = EventReader::new(response);

    let response = send(&app, post(Some(&id), call_with_progress(2, "p1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], 2);
    assert!(body["result"].get("isError").is_none());
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let inner: Value = serde_json::from_str(text).unwrap();
    assert_eq!(inner["statusCode"], 200);
    assert_eq!(inner["result"]["id"], "acc-1");

    let (first, payload) = events.next().await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(payload["method"], "notifications/progress");
    assert_eq!(payload["params"]["progressToken"], "p1");
    assert_eq!(events.ids(1).await, vec![2]);
}

// ── Scenario B: reconnect with Last-Event-ID ────────────────────────────

#[tokio::test]
async fn reconnect_resumes_after_last_event_id() {
    let (app, _state) = app();
    let id = initialize(&app).await;

    let mut events = EventReader::new(send(&app, get(&id, None)).await);
    for n in 0..2 {
        send(&app, post(Some(&id), call_with_progress(10 + n, "p"))).await;
    }
    assert_eq!(events.ids(4).await, vec![1, 2, 3, 4]);
    drop(events);

    // Produced while disconnected.
    send(&app, post(Some(&id), call_with_progress(20, "p"))).await;

    let mut events = EventReader::new(send(&app, get(&id, Some("4"))).await);
    assert_eq!(events.ids(2).await, vec![5, 6]);

    send(&app, post(Some(&id), call_with_progress(21, "p"))).await;
    assert_eq!(events.ids(2).await, vec![7, 8]);
}

#[tokio::test]
async fn reconnect_from_earlier_cursor_replays_missed_events_in_order() {
    let (app, _state) = app();
    let id = initialize(&app).await;
    for n in 0..3 {
        send(&app, post(Some(&id), call_with_progress(n, "p"))).await;
    }

    let mut events = EventReader::new(send(&app, get(&id, Some("2"))).await);
    assert_eq!(events.ids(4).await, vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn second_stream_replaces_the_first() {
    let (app, _state) = app();
    let id = initialize(&app).await;

    let mut first = EventReader::new(send(&app, get(&id, None)).await);
    let mut second = EventReader::new(send(&app, get(&id, None)).await);
    assert!(first.next().await.is_none());

    send(&app, post(Some(&id), call_with_progress(3, "p"))).await;
    assert_eq!(second.ids(2).await, vec![1, 2]);
}

// ── Scenario C: termination ─────────────────────────────────────────────

#[tokio::test]
async fn delete_terminates_session() {
    let (app, state) = app();
    let id = initialize(&app).await;
    let mut events = EventReader::new(send(&app, get(&id, None)).await);

    let response = send(&app, delete(&id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.registry.is_empty());
    assert!(events.next().await.is_none());

    let ping = json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" });
    let response = send(&app, post(Some(&id), ping)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["id"], Value::Null);

    let response = send(&app, delete(&id)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_unknown_session_leaves_registry_untouched() {
    let (app, state) = app();
    let id = initialize(&app).await;

    let response = send(&app, delete("not-a-session")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.registry.ids().len(), 1);
    assert!(state.registry.lookup(&id).is_ok());
}

// ── Scenario D: shutdown ────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_closes_every_session_and_ends_streams() {
    let (app, state) = app();
    let a = initialize(&app).await;
    let b = initialize(&app).await;
    assert_ne!(a, b);
    let mut stream_a = EventReader::new(send(&app, get(&a, None)).await);

    let report = state.lifecycle.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.closed.len(), 2);
    assert!(state.registry.is_empty());
    assert_eq!(state.transports.open_transports().count(), 0);
    assert!(stream_a.next().await.is_none());

    let response = send(&app, post(None, initialize_body())).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get("mcp-session-id").is_none());
}

// ── Stateless ───────────────────────────────────────────────────────────

#[tokio::test]
async fn stateless_request_leaves_no_session_behind() {
    let (app, state) = app();
    let list = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });
    let response = send(&app, post(None, list)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("mcp-session-id").is_none());
    let body = json_body(response).await;
    assert_eq!(body["result"]["tools"][0]["name"], "get_account");
    assert_eq!(body["result"]["tools"][0]["inputSchema"]["required"][0], "accountId");

    let response = send(&app, post(None, call_with_progress(2, "dropped"))).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(state.registry.is_empty());
    assert_eq!(state.transports.open_transports().count(), 0);
}

#[tokio::test]
async fn tool_errors_are_flagged_results() {
    let (app, _state) = app();
    let call = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": { "name": "get_account", "arguments": { "accountId": "missing" } }
    });
    let body = json_body(send(&app, post(None, call)).await).await;
    assert_eq!(body["result"]["isError"], true);
    let inner: Value = serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(inner["statusCode"], 404);
    assert_eq!(inner["body"]["error"], "no such account");

    let unknown = json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "tools/call",
        "params": { "name": "nope", "arguments": {} }
    });
    let body = json_body(send(&app, post(None, unknown)).await).await;
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["error"]["message"], "Tool 'nope' not found");
}

#[tokio::test]
async fn batch_gets_array_and_notifications_get_202() {
    let (app, _state) = app();
    let batch = json!([
        { "jsonrpc": "2.0", "id": 1, "method": "ping" },
        { "jsonrpc": "2.0", "method": "notifications/cancelled", "params": {} },
        { "jsonrpc": "2.0", "id": 2, "method": "no/such/method" }
    ]);
    let body = json_body(send(&app, post(None, batch)).await).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["result"], json!({}));
    assert_eq!(items[1]["error"]["code"], -32601);

    let only_notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    let response = send(&app, post(None, only_notification)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ── Rejections ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_initialize_does_not_create_a_session() {
    let (app, state) = app();
    let bad = json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} });
    let response = send(&app, post(None, bad)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("mcp-session-id").is_none());
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32602);
    assert!(state.registry.is_empty());
    assert_eq!(state.transports.open_transports().count(), 0);
}

#[tokio::test]
async fn reinitialize_on_existing_session_is_rejected() {
    let (app, state) = app();
    let id = initialize(&app).await;
    let response = send(&app, post(Some(&id), initialize_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["message"], "Invalid Request: Server already initialized");
    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let (app, _state) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["jsonrpc"], "2.0");
}

#[tokio::test]
async fn wrong_content_type_is_rejected() {
    let (app, _state) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("{}"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn unknown_session_on_post_is_a_client_error() {
    let (app, _state) = app();
    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
    let response = send(&app, post(Some("deadbeef"), ping)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["message"], "Bad Request: No valid session ID provided");
}

#[tokio::test]
async fn get_requires_session_and_event_stream_accept() {
    let (app, _state) = app();
    let id = initialize(&app).await;

    let missing = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, missing).await.status(), StatusCode::BAD_REQUEST);

    let json_only = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "application/json")
        .header("mcp-session-id", id.as_str())
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, json_only).await.status(), StatusCode::NOT_ACCEPTABLE);

    let response = send(&app, get(&id, Some("five"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_rejects_missing_or_unknown_session_before_accept() {
    let (app, _state) = app();

    let missing = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, missing).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], -32000);

    let unknown = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(header::ACCEPT, "application/json")
        .header("mcp-session-id", "S9")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, unknown).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn post_rejects_unknown_session_before_content_type() {
    let (app, _state) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("mcp-session-id", "S9")
        .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({
            "jsonrpc": "2.0",
            "error": { "code": -32000, "message": "Bad Request: No valid session ID provided" },
            "id": null
        })
    );
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let (app, _state) = app();
    let request = Request::builder().method("PUT").uri("/mcp").body(Body::empty()).unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST, DELETE");
    let body = json_body(response).await;
    assert_eq!(
        body,
        json!({ "jsonrpc": "2.0", "error": { "code": -32000, "message": "Method not allowed." }, "id": null })
    );
}

#[tokio::test]
async fn health_reports_session_counts() {
    let (app, _state) = app();
    initialize(&app).await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let body = json_body(send(&app, request).await).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);
    assert!(body["oldest_session_secs"].as_i64().is_some_and(|age| (0..5).contains(&age)));
    assert_eq!(body["open_transports"], 1);
    assert_eq!(body["shutting_down"], false);
}
