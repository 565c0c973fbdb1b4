//! Integration tests for the streamable HTTP server and client transport.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mcp_engine::engine::RequestContext;
use mcp_engine::http::{serve_listener, Delivery, SessionManager};
use mcp_engine::protocol::message::INVALID_PARAMS;
use mcp_engine::server::{Arguments, Tool, ToolResponse};
use mcp_engine::transport::http_client::{StreamableHttpClientTransport, SESSION_ID_HEADER};
use mcp_engine::transport::sse::SseDecoder;
use mcp_engine::transport::Transport;
use mcp_engine::{ClientBuilder, McpServer, RequestOptions};

use super::test_helpers::initialize_request;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    endpoint: String,
    base: String,
    manager: Arc<SessionManager>,
    http: reqwest::Client,
    ct: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

async fn start(keepalive: Duration) -> Harness {
    let server = McpServer::builder("http-server", "1")
        .tool(Tool::new(
            "echo",
            |args: Arguments, _ctx: RequestContext| async move {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(ToolResponse::text(text))
            },
        ))
        .build();
    let manager = server.session_manager(keepalive);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let ct = CancellationToken::new();
    tokio::spawn(serve_listener(
        listener,
        Arc::clone(&manager),
        "/mcp",
        ct.clone(),
    ));

    let base = format!("http://{addr}");
    Harness {
        endpoint: format!("{base}/mcp"),
        base,
        manager,
        http: reqwest::Client::new(),
        ct,
    }
}

impl Harness {
    async fn post(&self, session: Option<&str>, body: &Value) -> reqwest::Response {
        let mut req = self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(session) = session {
            req = req.header(SESSION_ID_HEADER, session);
        }
        req.send().await.expect("POST")
    }

    /// Open a session and complete its handshake.
    async fn session(&self) -> String {
        let resp = self.post(None, &initialize_request(1)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let session = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .expect("session header")
            .to_owned();

        let resp = self
            .post(
                Some(&session),
                &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        session
    }

    async fn open_stream(&self, session: &str) -> EventStream {
        let resp = self
            .http
            .get(&self.endpoint)
            .header(SESSION_ID_HEADER, session)
            .header("accept", "text/event-stream")
            .send()
            .await
            .expect("GET");
        assert_eq!(resp.status(), StatusCode::OK);
        EventStream {
            resp,
            decoder: SseDecoder::default(),
            ready: Vec::new(),
        }
    }
}

struct EventStream {
    resp: reqwest::Response,
    decoder: SseDecoder,
    ready: Vec<String>,
}

impl EventStream {
    /// Next `data` payload, parsed.
    async fn next(&mut self) -> Value {
        loop {
            if !self.ready.is_empty() {
                let raw = self.ready.remove(0);
                return serde_json::from_str(&raw).expect("event is JSON");
            }
            let chunk = tokio::time::timeout(WAIT, self.resp.chunk())
                .await
                .expect("event in time")
                .expect("stream read")
                .expect("stream still open");
            let text = String::from_utf8(chunk.to_vec()).expect("utf8");
            self.ready.extend(self.decoder.push(&text));
        }
    }

    /// Raw text of the next chunk.
    async fn next_raw(&mut self) -> String {
        let chunk = tokio::time::timeout(WAIT, self.resp.chunk())
            .await
            .expect("chunk in time")
            .expect("stream read")
            .expect("stream still open");
        String::from_utf8(chunk.to_vec()).expect("utf8")
    }

    /// Whether the server ended the stream.
    async fn ended(&mut self) -> bool {
        matches!(
            tokio::time::timeout(WAIT, self.resp.chunk()).await,
            Ok(Ok(None) | Err(_))
        )
    }
}

#[tokio::test]
async fn health_answers_ok() {
    let harness = start(Duration::from_secs(30)).await;
    let resp = harness
        .http
        .get(format!("{}/health", harness.base))
        .send()
        .await
        .expect("GET /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.expect("body"), "ok");
}

#[tokio::test]
async fn initialize_opens_a_session() {
    let harness = start(Duration::from_secs(30)).await;
    let resp = harness.post(None, &initialize_request(1)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(SESSION_ID_HEADER));
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["serverInfo"]["name"], "http-server");
    assert_eq!(harness.manager.session_count(), 1);
}

#[tokio::test]
async fn failed_initialize_leaves_no_session() {
    let harness = start(Duration::from_secs(30)).await;

    for id in 1..=3 {
        let bad = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {"protocolVersion": 5}
        });
        let resp = harness.post(None, &bad).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key(SESSION_ID_HEADER));
        let body: Value = resp.json().await.expect("JSON body");
        assert_eq!(body["id"], id);
        assert_eq!(body["error"]["code"], INVALID_PARAMS);
    }

    let resp = harness
        .post(None, &json!({"jsonrpc": "2.0", "method": "initialize"}))
        .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert!(!resp.headers().contains_key(SESSION_ID_HEADER));
    assert!(resp.text().await.expect("body").is_empty());

    assert_eq!(harness.manager.session_count(), 0);
}

#[tokio::test]
async fn requests_without_a_valid_session_are_rejected() {
    let harness = start(Duration::from_secs(30)).await;
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});

    let resp = harness.post(None, &ping).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["error"], "Missing session ID");

    let resp = harness.post(Some("no-such-session"), &ping).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["error"], "Invalid session ID");

    let resp = harness
        .http
        .post(&harness.endpoint)
        .body("{oops")
        .send()
        .await
        .expect("POST");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["error"], "Invalid JSON");
}

#[tokio::test]
async fn get_and_other_methods_follow_the_session_rules() {
    let harness = start(Duration::from_secs(30)).await;

    let resp = harness.http.get(&harness.endpoint).send().await.expect("GET");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = harness
        .http
        .get(&harness.endpoint)
        .header(SESSION_ID_HEADER, "missing")
        .send()
        .await
        .expect("GET");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = harness.http.put(&harness.endpoint).send().await.expect("PUT");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn requests_are_answered_directly_without_a_stream() {
    let harness = start(Duration::from_secs(30)).await;
    let session = harness.session().await;

    let resp = harness
        .post(
            Some(&session),
            &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": {"name": "echo", "arguments": {"text": "hey"}}}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["result"]["content"][0]["text"], "hey");
}

#[tokio::test]
async fn replies_go_to_the_open_stream() {
    let harness = start(Duration::from_secs(30)).await;
    let session = harness.session().await;
    let mut stream = harness.open_stream(&session).await;
    assert!(harness.manager.has_stream(&session));

    let resp = harness
        .post(
            Some(&session),
            &json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body, json!({"accepted": true}));

    let event = stream.next().await;
    assert_eq!(event["id"], 3);
    assert_eq!(event["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn notifications_fan_out_or_target_one_session() {
    let harness = start(Duration::from_secs(30)).await;
    let first = harness.session().await;
    let second = harness.session().await;
    let mut first_stream = harness.open_stream(&first).await;
    let mut second_stream = harness.open_stream(&second).await;

    let delivery = harness
        .manager
        .notify("notifications/message", Some(json!({"n": 1})), None)
        .expect("encode");
    assert_eq!(delivery, Delivery::Broadcast(2));

    let delivery = harness
        .manager
        .notify("notifications/message", Some(json!({"n": 2})), Some(&first))
        .expect("encode");
    assert_eq!(delivery, Delivery::Targeted(true));

    let delivery = harness
        .manager
        .notify("notifications/message", Some(json!({"n": 3})), None)
        .expect("encode");
    assert_eq!(delivery, Delivery::Broadcast(2));

    assert_eq!(first_stream.next().await["params"]["n"], 1);
    assert_eq!(first_stream.next().await["params"]["n"], 2);
    assert_eq!(first_stream.next().await["params"]["n"], 3);

    assert_eq!(second_stream.next().await["params"]["n"], 1);
    assert_eq!(second_stream.next().await["params"]["n"], 3);

    let delivery = harness
        .manager
        .notify("notifications/message", None, Some("nobody"))
        .expect("encode");
    assert_eq!(delivery, Delivery::Targeted(false));
}

#[tokio::test]
async fn session_engine_writes_to_its_stream() {
    let harness = start(Duration::from_secs(30)).await;
    let session = harness.session().await;
    let mut stream = harness.open_stream(&session).await;

    let engine = harness.manager.engine(&session).expect("session engine");
    engine
        .notify("notifications/tools/list_changed", None)
        .await
        .expect("written to stream");

    let event = stream.next().await;
    assert_eq!(event["method"], "notifications/tools/list_changed");
}

#[tokio::test]
async fn a_new_stream_replaces_the_old_one() {
    let harness = start(Duration::from_secs(30)).await;
    let session = harness.session().await;
    let mut old = harness.open_stream(&session).await;
    let mut new = harness.open_stream(&session).await;

    assert!(old.ended().await);

    harness
        .manager
        .notify("notifications/message", Some(json!({"to": "new"})), Some(&session))
        .expect("encode");
    assert_eq!(new.next().await["params"]["to"], "new");
}

#[tokio::test]
async fn keepalive_comments_arrive_on_idle_streams() {
    let harness = start(Duration::from_millis(50)).await;
    let session = harness.session().await;
    let mut stream = harness.open_stream(&session).await;

    let text = stream.next_raw().await;
    assert!(text.starts_with(':'), "got {text:?}");
    assert!(text.contains("ping"));
}

#[tokio::test]
async fn delete_ends_the_session() {
    let harness = start(Duration::from_secs(30)).await;
    let session = harness.session().await;
    let mut stream = harness.open_stream(&session).await;

    let resp = harness
        .http
        .delete(&harness.endpoint)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .expect("DELETE");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body, json!({"success": true}));

    assert_eq!(harness.manager.session_count(), 0);
    assert!(stream.ended().await);

    let resp = harness
        .post(Some(&session), &json!({"jsonrpc": "2.0", "id": 9, "method": "ping"}))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = harness
        .http
        .delete(&harness.endpoint)
        .send()
        .await
        .expect("DELETE");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("JSON body");
    assert_eq!(body["error"], "Missing session ID");

    // Deleting an unknown session still succeeds.
    let resp = harness
        .http
        .delete(&harness.endpoint)
        .header(SESSION_ID_HEADER, &session)
        .send()
        .await
        .expect("DELETE");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn client_transport_completes_a_round_trip() {
    let harness = start(Duration::from_secs(30)).await;
    let transport =
        Arc::new(StreamableHttpClientTransport::new(harness.endpoint.clone()).expect("client"));

    let client = ClientBuilder::new("http-client", "1")
        .connect(transport.clone())
        .await
        .expect("handshake");
    assert_eq!(client.server().info.name, "http-server");
    assert!(transport.session_id().is_some());

    let tools = client.list_tools().await.expect("tools/list");
    assert_eq!(tools[0]["name"], "echo");

    let response = client
        .call_tool("echo", json!({"text": "over http"}), RequestOptions::new())
        .await
        .expect("tools/call");
    assert_eq!(response, ToolResponse::text("over http"));

    client.close().await;
    assert_eq!(harness.manager.session_count(), 0);
}
