#![forbid(unsafe_code)]

//! `mcp-engine`: MCP server binary.
//!
//! Serves a small demonstration catalog over stdio or streamable HTTP.
//! Logs always go to stderr so they never corrupt the stdio stream.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_engine::engine::RequestContext;
use mcp_engine::http::serve_http;
use mcp_engine::server::{
    Arguments, Prompt, PromptArgument, PromptMessage, PromptResult, Resource, ResourceContents,
    Tool, ToolResponse,
};
use mcp_engine::{AppError, GlobalConfig, McpServer, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-engine", about = "Model Context Protocol server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Transport to serve on.
    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    transport: TransportKind,

    /// Override the HTTP port from the configuration.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-engine server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(port) = args.port {
        config.http.port = port;
    }
    info!(server = %config.server.name, "configuration loaded");

    let server = demo_server(&config);
    let ct = CancellationToken::new();

    // ── Start transport ─────────────────────────────────
    let serve_ct = ct.clone();
    let mut handle = match args.transport {
        TransportKind::Stdio => {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                if let Err(err) = server.serve_stdio(serve_ct).await {
                    error!(%err, "stdio transport failed");
                }
            })
        }
        TransportKind::Http => {
            let manager = server.session_manager(config.http.keepalive());
            let http = config.http.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_http(manager, &http, serve_ct).await {
                    error!(%err, "http transport failed");
                }
            })
        }
    };

    info!(transport = ?args.transport, "MCP server ready");

    // ── Wait for shutdown signal or transport exit ──────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            let _ = handle.await;
        }
        _ = &mut handle => {
            info!("transport exited");
        }
    }
    info!("mcp-engine shut down");

    Ok(())
}

/// The catalog this binary serves.
fn demo_server(config: &GlobalConfig) -> Arc<McpServer> {
    let summary = json!({
        "name": config.server.name,
        "strict": config.server.strict,
        "http": {"host": config.http.host, "port": config.http.port, "path": config.http.path},
    })
    .to_string();

    let mut builder = McpServer::builder(&config.server.name, &config.server.version)
        .config(config.engine_config())
        .with_logging()
        .tool(
            Tool::new("echo", |args: Arguments, _ctx: RequestContext| async move {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(ToolResponse::text(text))
            })
            .with_description("Echo the given text back")
            .with_input_schema(json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
            })),
        )
        .tool(
            Tool::new("countdown", |args: Arguments, ctx: RequestContext| async move {
                let steps = args.get("steps").and_then(Value::as_u64).unwrap_or(3);
                for step in 1..=steps {
                    #[allow(clippy::cast_precision_loss)]
                    ctx.report_progress(step as f64, Some(steps as f64), None)
                        .await?;
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                Ok(ToolResponse::text(format!("counted {steps} steps")))
            })
            .with_description("Count down, reporting progress for each step"),
        )
        .prompt(
            Prompt::new("greeting", |args: Arguments, _ctx: RequestContext| async move {
                let name = args.get("name").and_then(Value::as_str).unwrap_or("there");
                Ok(PromptResult {
                    description: Some("A friendly greeting".into()),
                    messages: vec![PromptMessage::text("user", format!("Say hello to {name}."))],
                })
            })
            .with_description("Greet someone by name")
            .with_argument(PromptArgument::required("name").with_description("Who to greet")),
        )
        .resource(
            Resource::new("config://server", "Server configuration")
                .with_mime_type("application/json"),
        )
        .resource_reader(move |uri: String, _ctx: RequestContext| {
            let summary = summary.clone();
            async move {
                if uri == "config://server" {
                    Ok(vec![ResourceContents::text(
                        uri,
                        Some("application/json".into()),
                        summary,
                    )])
                } else {
                    Err(AppError::NotFound(format!("resource {uri}")))
                }
            }
        });
    if let Some(instructions) = &config.server.instructions {
        builder = builder.instructions(instructions.clone());
    }
    builder.build()
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
