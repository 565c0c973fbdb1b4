//! Integration tests for the server and client roles wired over an
//! in-memory transport: handshake, catalog methods, gating, and
//! server-initiated traffic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use mcp_engine::engine::{EngineConfig, RegistryBuilder, RequestContext};
use mcp_engine::protocol::capabilities::Capabilities;
use mcp_engine::protocol::message::INVALID_REQUEST;
use mcp_engine::server::{
    Arguments, Prompt, PromptArgument, PromptMessage, PromptResult, Resource, ResourceContents,
    ResourceTemplate, Tool, ToolResponse,
};
use mcp_engine::{AppError, ClientBuilder, McpServer, RequestOptions};

use super::test_helpers::{initialize_request, serve_in_memory, server_with_peer};

fn echo_tool() -> Tool {
    Tool::new("echo", |args: Arguments, _ctx: RequestContext| async move {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(ToolResponse::text(text))
    })
    .with_description("Echo text")
    .with_input_schema(json!({
        "type": "object",
        "properties": {"text": {"type": "string"}},
        "required": ["text"]
    }))
}

fn steps_tool() -> Tool {
    Tool::new("steps", |_args: Arguments, ctx: RequestContext| async move {
        for step in 1..=3 {
            ctx.report_progress(f64::from(step), Some(3.0), None).await?;
        }
        Ok(ToolResponse::text("done"))
    })
}

fn failing_tool() -> Tool {
    Tool::new("fail", |_args: Arguments, _ctx: RequestContext| async move {
        Err::<ToolResponse, _>(AppError::Handler("disk on fire".into()))
    })
}

fn greeting_prompt() -> Prompt {
    Prompt::new("greeting", |args: Arguments, _ctx: RequestContext| async move {
        let name = args.get("name").and_then(Value::as_str).unwrap_or_default();
        Ok(PromptResult {
            description: None,
            messages: vec![PromptMessage::text("user", format!("Hello {name}"))],
        })
    })
    .with_argument(PromptArgument::required("name"))
}

fn catalog_server(config: EngineConfig) -> Arc<McpServer> {
    McpServer::builder("test-server", "1.2.3")
        .config(config)
        .instructions("be nice")
        .tool(echo_tool())
        .tool(steps_tool())
        .tool(failing_tool())
        .prompt(greeting_prompt())
        .resource(Resource::new("mem://a", "A"))
        .resource_reader(|uri: String, _ctx: RequestContext| async move {
            Ok(vec![ResourceContents::text(uri, None, "alpha")])
        })
        .build()
}

fn rpc_data(err: &AppError) -> Value {
    match err {
        AppError::Rpc(object) => object.data.clone().unwrap_or(Value::Null),
        other => panic!("expected an error response, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_reports_server_identity() {
    let server = catalog_server(EngineConfig::default());
    let (server_engine, transport) = serve_in_memory(&server).await;

    let client = ClientBuilder::new("test-client", "0.1")
        .connect(transport)
        .await
        .expect("handshake");

    let peer = client.server();
    assert_eq!(peer.info.name, "test-server");
    assert_eq!(peer.info.version, "1.2.3");
    assert_eq!(peer.instructions.as_deref(), Some("be nice"));
    assert!(peer.capabilities.tools.is_some());
    assert!(peer.capabilities.prompts.is_some());
    assert!(peer.capabilities.resources.is_some());

    client.ping().await.expect("ping");
    assert!(server_engine.negotiator().is_initialized());
}

#[tokio::test]
async fn tools_are_listed_and_called() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let tools = client.list_tools().await.expect("tools/list");
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"echo"));
    let echo = tools.iter().find(|t| t["name"] == "echo").expect("echo");
    assert_eq!(echo["inputSchema"]["required"], json!(["text"]));

    let response = client
        .call_tool("echo", json!({"text": "hi"}), RequestOptions::new())
        .await
        .expect("tools/call");
    assert_eq!(response, ToolResponse::text("hi"));
}

#[tokio::test]
async fn tool_domain_errors_carry_readable_data() {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let config = EngineConfig::default()
        .with_exception_reporter(move |err, _ctx| sink.lock().unwrap().push(err.to_string()));
    let server = catalog_server(config);
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let err = client
        .call_tool("echo", json!({}), RequestOptions::new())
        .await
        .expect_err("missing argument");
    assert_eq!(rpc_data(&err), "Missing required arguments: text");

    let err = client
        .call_tool("nope", json!({}), RequestOptions::new())
        .await
        .expect_err("unknown tool");
    assert_eq!(rpc_data(&err), "Tool not found nope");

    let err = client
        .call_tool("fail", json!({}), RequestOptions::new())
        .await
        .expect_err("tool failure");
    assert_eq!(rpc_data(&err), "Internal error calling tool fail");

    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("disk on fire"));
}

#[tokio::test]
async fn prompts_render_and_validate_arguments() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let prompts = client.list_prompts().await.expect("prompts/list");
    assert_eq!(prompts[0]["name"], "greeting");
    assert_eq!(prompts[0]["arguments"][0]["required"], true);

    let rendered = client
        .get_prompt("greeting", json!({"name": "Ada"}))
        .await
        .expect("prompts/get");
    assert_eq!(rendered.messages[0].content["text"], "Hello Ada");

    let err = client
        .get_prompt("greeting", json!({}))
        .await
        .expect_err("missing name");
    assert_eq!(rpc_data(&err), "Missing required arguments: name");

    let err = client
        .get_prompt("absent", json!({}))
        .await
        .expect_err("unknown prompt");
    assert_eq!(rpc_data(&err), "Prompt not found absent");
}

#[tokio::test]
async fn resources_are_listed_and_read() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let resources = client.list_resources().await.expect("resources/list");
    assert_eq!(resources, vec![json!({"uri": "mem://a", "name": "A"})]);

    let contents = client.read_resource("mem://a").await.expect("resources/read");
    assert_eq!(contents[0]["text"], "alpha");
    assert_eq!(contents[0]["uri"], "mem://a");
}

#[tokio::test]
async fn strict_server_rejects_requests_before_initialized() {
    let server = catalog_server(EngineConfig::default().with_strict(true));
    let (_server_engine, mut peer) = server_with_peer(&server).await;

    let reply = peer.call(1, "tools/list", json!({})).await;
    assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    assert_eq!(reply["error"]["data"], "tools/list");

    // Ping is always allowed.
    let reply = peer.call(2, "ping", json!({})).await;
    assert_eq!(reply["result"], json!({}));

    peer.send(initialize_request(3)).await;
    let reply = peer.recv().await;
    assert!(reply["result"]["protocolVersion"].is_string());
    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let reply = peer.call(4, "tools/list", json!({})).await;
    assert_eq!(reply["result"]["tools"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn early_initialized_does_not_skip_the_handshake() {
    let server = catalog_server(EngineConfig::default().with_strict(true));
    let (_server_engine, mut peer) = server_with_peer(&server).await;

    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    // A request that borrows the notification's name is not a confirmation.
    let reply = peer.call(1, "notifications/initialized", json!({})).await;
    assert!(reply.get("error").is_some());

    let reply = peer.call(2, "tools/list", json!({})).await;
    assert_eq!(reply["error"]["code"], INVALID_REQUEST);

    peer.send(initialize_request(3)).await;
    let reply = peer.recv().await;
    assert!(reply["result"]["protocolVersion"].is_string());
    peer.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let reply = peer.call(4, "tools/list", json!({})).await;
    assert!(reply["result"]["tools"].is_array());
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, mut peer) = server_with_peer(&server).await;

    peer.send(initialize_request(1)).await;
    assert!(peer.recv().await.get("result").is_some());

    peer.send(initialize_request(2)).await;
    let reply = peer.recv().await;
    assert_eq!(reply["error"]["code"], INVALID_REQUEST);
}

#[tokio::test]
async fn unsupported_client_version_gets_the_server_preference() {
    let server = catalog_server(EngineConfig::default().with_protocol_version("2024-11-05"));
    let (_server_engine, mut peer) = server_with_peer(&server).await;

    let mut request = initialize_request(1);
    request["params"]["protocolVersion"] = json!("1999-01-01");
    peer.send(request).await;

    let reply = peer.recv().await;
    assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn strict_client_refuses_methods_the_server_lacks() {
    let server = McpServer::builder("tools-only", "1")
        .tool(echo_tool())
        .build();
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .strict(true)
        .connect(transport)
        .await
        .expect("handshake");

    let err = client.list_prompts().await.expect_err("no prompts capability");
    assert!(
        matches!(
            err,
            AppError::MissingCapability { ref capability, side: "Server", .. } if capability == "prompts"
        ),
        "got {err:?}"
    );
    client.list_tools().await.expect("tools are advertised");
}

#[tokio::test]
async fn lenient_client_sees_the_server_side_refusal() {
    let server = McpServer::builder("tools-only", "1")
        .tool(echo_tool())
        .build();
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let err = client.list_prompts().await.expect_err("server refuses");
    assert_eq!(
        rpc_data(&err),
        "Server does not support prompts (required for prompts/list)"
    );
}

#[tokio::test]
async fn pinned_version_mismatch_fails_the_handshake() {
    let server = catalog_server(EngineConfig::default());
    let (server_engine, transport) = serve_in_memory(&server).await;

    let err = ClientBuilder::new("c", "0")
        .pin_protocol_version("2099-01-01")
        .connect(transport)
        .await
        .err()
        .expect("version mismatch");
    assert!(matches!(err, AppError::Handshake(_)), "got {err:?}");

    tokio::time::timeout(Duration::from_secs(5), server_engine.closed().cancelled())
        .await
        .expect("server engine closes with the client");
}

#[tokio::test]
async fn pinned_supported_version_is_honoured() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, transport) = serve_in_memory(&server).await;

    let client = ClientBuilder::new("c", "0")
        .pin_protocol_version("2024-11-05")
        .connect(transport)
        .await
        .expect("handshake");
    assert_eq!(client.server().protocol_version, "2024-11-05");
}

#[tokio::test]
async fn progress_reaches_the_caller() {
    let server = catalog_server(EngineConfig::default());
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let response = client
        .call_tool(
            "steps",
            json!({}),
            RequestOptions::new().on_progress(move |update| {
                sink.lock().unwrap().push((update.progress, update.total));
            }),
        )
        .await
        .expect("tools/call");

    assert_eq!(response, ToolResponse::text("done"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(1.0, Some(3.0)), (2.0, Some(3.0)), (3.0, Some(3.0))]
    );
}

#[tokio::test]
async fn server_can_call_back_into_the_client() {
    let server = McpServer::builder("asks-roots", "1")
        .tool(Tool::new(
            "count_roots",
            |_args: Arguments, ctx: RequestContext| async move {
                let roots = ctx
                    .peer()
                    .request_value("roots/list", None, RequestOptions::new())
                    .await?;
                let count = roots["roots"].as_array().map_or(0, Vec::len);
                Ok(ToolResponse::text(count.to_string()))
            },
        ))
        .build();
    let (_server_engine, transport) = serve_in_memory(&server).await;

    let client = ClientBuilder::new("c", "0")
        .capabilities(Capabilities::default().with_roots(false))
        .handlers(|registry: RegistryBuilder| {
            registry.request("roots/list", |_params: Value, _ctx: RequestContext| async move {
                Ok(json!({"roots": [{"uri": "file:///a"}, {"uri": "file:///b"}]}))
            })
        })
        .connect(transport)
        .await
        .expect("handshake");

    let response = client
        .call_tool("count_roots", json!({}), RequestOptions::new())
        .await
        .expect("tools/call");
    assert_eq!(response, ToolResponse::text("2"));
}

#[tokio::test]
async fn instrumentation_sees_every_request() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let config = EngineConfig::default().with_instrumentation(move |record| {
        sink.lock()
            .unwrap()
            .push((record.method.clone(), record.error_code));
    });
    let server = catalog_server(config);
    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .connect(transport)
        .await
        .expect("handshake");

    client.list_tools().await.expect("tools/list");
    let _ = client.call_tool("nope", json!({}), RequestOptions::new()).await;

    let records = records.lock().unwrap();
    assert!(records.contains(&("initialize".to_owned(), None)));
    assert!(records.contains(&("tools/list".to_owned(), None)));
    assert!(records
        .iter()
        .any(|(method, code)| method == "tools/call" && code.is_some()));
}

#[tokio::test]
async fn optional_capabilities_unlock_their_methods() {
    let server = McpServer::builder("extras", "1")
        .resource_template(ResourceTemplate::new("file:///{path}", "Files"))
        .with_subscriptions()
        .with_logging()
        .with_completions()
        .build();
    let caps = server.capabilities();
    assert_eq!(caps.resources.as_ref().and_then(|r| r.subscribe), Some(true));
    assert!(caps.logging.is_some());
    assert!(caps.completions.is_some());

    let (_server_engine, transport) = serve_in_memory(&server).await;
    let client = ClientBuilder::new("c", "0")
        .strict(true)
        .connect(transport)
        .await
        .expect("handshake");

    let templates: Value = client
        .request("resources/templates/list", None, RequestOptions::new())
        .await
        .expect("templates");
    assert_eq!(templates["resourceTemplates"][0]["uriTemplate"], "file:///{path}");

    let subscribed: Value = client
        .request(
            "resources/subscribe",
            Some(json!({"uri": "file:///x"})),
            RequestOptions::new(),
        )
        .await
        .expect("subscribe");
    assert_eq!(subscribed, json!({}));

    let level: Value = client
        .request(
            "logging/setLevel",
            Some(json!({"level": "debug"})),
            RequestOptions::new(),
        )
        .await
        .expect("setLevel");
    assert_eq!(level, json!({}));

    let completion: Value = client
        .request("completion/complete", Some(json!({})), RequestOptions::new())
        .await
        .expect("complete");
    assert_eq!(completion["completion"]["hasMore"], false);
}
