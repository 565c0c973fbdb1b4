#![forbid(unsafe_code)]

//! `mcp-engine-ctl`: command-line MCP client.
//!
//! Connects to a server over streamable HTTP (`--url`) or by spawning it
//! as a stdio subprocess (`--command`), runs one command, and prints the
//! result as pretty JSON.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

use mcp_engine::engine::RequestOptions;
use mcp_engine::transport::http_client::StreamableHttpClientTransport;
use mcp_engine::transport::stdio::{SpawnConfig, StdioTransport};
use mcp_engine::transport::Transport;
use mcp_engine::{AppError, Client, ClientBuilder, Result};

#[derive(Debug, Parser)]
#[command(
    name = "mcp-engine-ctl",
    about = "Command-line client for MCP servers",
    version,
    long_about = None
)]
struct Cli {
    /// Streamable HTTP endpoint, e.g. `http://127.0.0.1:3000/`.
    #[arg(long, conflicts_with = "command")]
    url: Option<String>,

    /// Server executable to spawn over stdio.
    #[arg(long)]
    command: Option<String>,

    /// Arguments for `--command`.
    #[arg(long = "arg", allow_hyphen_values = true)]
    command_args: Vec<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Reject protocol versions other than this one.
    #[arg(long)]
    protocol_version: Option<String>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Check that the server answers.
    Ping,

    /// List tools.
    Tools,

    /// Call a tool.
    Call {
        /// Tool name.
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// List prompts.
    Prompts,

    /// Render a prompt.
    Prompt {
        /// Prompt name.
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// List resources.
    Resources,

    /// Read a resource.
    Read {
        /// Resource URI.
        uri: String,
    },
}

fn main() {
    let args = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<Value> {
    let transport: Arc<dyn Transport> = match (&args.url, &args.command) {
        (Some(url), _) => Arc::new(StreamableHttpClientTransport::new(url.clone())?),
        (None, Some(program)) => Arc::new(StdioTransport::spawn(SpawnConfig::new(
            program.clone(),
            args.command_args.clone(),
        ))),
        (None, None) => {
            return Err(AppError::Config("either --url or --command is required".into()));
        }
    };

    let mut builder = ClientBuilder::new("mcp-engine-ctl", env!("CARGO_PKG_VERSION"))
        .request_timeout(Duration::from_secs(args.timeout));
    if let Some(version) = &args.protocol_version {
        builder = builder.pin_protocol_version(version.clone());
    }
    let client = builder.connect(transport).await?;

    let outcome = execute(&client, args.action).await;
    client.close().await;
    outcome
}

async fn execute(client: &Client, action: Action) -> Result<Value> {
    match action {
        Action::Ping => {
            client.ping().await?;
            Ok(Value::String("pong".into()))
        }
        Action::Tools => Ok(Value::Array(client.list_tools().await?)),
        Action::Call { name, args } => {
            let response = client
                .call_tool(&name, parse_object(&args)?, RequestOptions::new())
                .await?;
            Ok(serde_json::to_value(response)?)
        }
        Action::Prompts => Ok(Value::Array(client.list_prompts().await?)),
        Action::Prompt { name, args } => {
            let rendered = client.get_prompt(&name, parse_object(&args)?).await?;
            Ok(serde_json::to_value(rendered)?)
        }
        Action::Resources => Ok(Value::Array(client.list_resources().await?)),
        Action::Read { uri } => Ok(Value::Array(client.read_resource(&uri).await?)),
    }
}

fn parse_object(raw: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(raw)? {
        value @ Value::Object(_) => Ok(value),
        _ => Err(AppError::InvalidParams("--args must be a JSON object".into())),
    }
}
