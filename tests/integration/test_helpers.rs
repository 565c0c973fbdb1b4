//! Shared helpers for engine-level integration tests.
//!
//! A [`RawPeer`] is the far half of an in-memory transport pair driven by
//! hand, so tests can write exact frames and inspect exact replies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use mcp_engine::engine::{Engine, EngineConfig, Negotiator, Registry, Role};
use mcp_engine::protocol::capabilities::Capabilities;
use mcp_engine::protocol::lifecycle::Implementation;
use mcp_engine::transport::memory::MemoryTransport;
use mcp_engine::transport::Transport;
use mcp_engine::McpServer;

/// How long a test waits for a frame before failing.
pub const REPLY_WAIT: Duration = Duration::from_secs(5);

/// The hand-driven end of a memory transport.
pub struct RawPeer {
    transport: Arc<MemoryTransport>,
    inbound: mpsc::Receiver<String>,
}

impl RawPeer {
    async fn attach(transport: Arc<MemoryTransport>) -> Self {
        transport.connect().await.expect("connect raw peer");
        let inbound = transport.receive().expect("raw peer inbound");
        Self { transport, inbound }
    }

    /// Write `frame` as one JSON text.
    pub async fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    /// Write `text` verbatim.
    pub async fn send_raw(&self, text: &str) {
        self.transport
            .send(text.to_owned())
            .await
            .expect("raw peer send");
    }

    /// Next frame from the engine, parsed.
    pub async fn recv(&mut self) -> Value {
        let raw = tokio::time::timeout(REPLY_WAIT, self.inbound.recv())
            .await
            .expect("frame within the wait")
            .expect("engine side still open");
        serde_json::from_str(&raw).expect("engine writes JSON")
    }

    /// Send a request and wait for the frame that answers it.
    pub async fn call(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let frame = self.recv().await;
            if frame["id"] == json!(id) && frame.get("method").is_none() {
                return frame;
            }
        }
    }

    /// Tear down the pair from this side.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }
}

/// Start an engine with `role` over one half of a pair and return the
/// other half as a [`RawPeer`].
pub async fn engine_with_peer(
    role: Role,
    registry: Registry,
    capabilities: Capabilities,
    config: EngineConfig,
) -> (Engine, RawPeer) {
    let (near, far) = MemoryTransport::arc_pair();
    let negotiator = Negotiator::new(role, Implementation::new("under-test", "0.1"), capabilities)
        .with_strict(config.strict());
    let engine = Engine::new(near, registry, negotiator, config);
    engine.start().await.expect("start engine");
    (engine, RawPeer::attach(far).await)
}

/// Start `server`'s engine over one half of a pair and return the other
/// half as a [`RawPeer`].
pub async fn server_with_peer(server: &McpServer) -> (Engine, RawPeer) {
    let (near, far) = MemoryTransport::arc_pair();
    let engine = server.engine(near);
    engine.start().await.expect("start server engine");
    (engine, RawPeer::attach(far).await)
}

/// A started server engine and the client-side transport half for it.
pub async fn serve_in_memory(server: &McpServer) -> (Engine, Arc<dyn Transport>) {
    let (client_half, server_half) = MemoryTransport::arc_pair();
    let engine = server.engine(server_half);
    engine.start().await.expect("start server engine");
    let client_half: Arc<dyn Transport> = client_half;
    (engine, client_half)
}

/// The standard `initialize` request body.
pub fn initialize_request(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "raw", "version": "0"}
        }
    })
}

/// A progress notification for `token`.
pub fn progress(token: &Value, step: u32) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {"progressToken": token, "progress": step}
    })
}
