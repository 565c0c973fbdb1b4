//! Client role: handshake plus typed wrappers for the common server methods.
//!
//! [`ClientBuilder::connect`] starts an engine, sends `initialize`, checks
//! the chosen protocol version, and announces `notifications/initialized`.
//! Any failure along the way closes the engine before the error returns.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::engine::{
    BatchBuilder, Engine, EngineConfig, Negotiator, PeerInfo, RegistryBuilder, RequestOptions,
    Role,
};
use crate::protocol::capabilities::Capabilities;
use crate::protocol::lifecycle::{Implementation, InitializeResult};
use crate::protocol::methods;
use crate::server::{PromptResult, ToolResponse};
use crate::transport::Transport;
use crate::Result;

type HandlerSetup = Box<dyn FnOnce(RegistryBuilder) -> RegistryBuilder + Send>;

/// Builder for a connected [`Client`].
pub struct ClientBuilder {
    info: Implementation,
    capabilities: Capabilities,
    config: EngineConfig,
    handlers: Option<HandlerSetup>,
}

impl ClientBuilder {
    /// A client identifying itself as `name`/`version`.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            capabilities: Capabilities::default(),
            config: EngineConfig::default(),
            handlers: None,
        }
    }

    /// Capabilities advertised to the server.
    #[must_use]
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Engine configuration (timeouts, strict mode, pinned version). Fields
    /// set in `config` override earlier builder calls.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = self.config.merge(&config);
        self
    }

    /// Enforce the lifecycle and capability gates.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.config = self.config.with_strict(strict);
        self
    }

    /// Require the server to choose exactly `version`.
    #[must_use]
    pub fn pin_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config = self.config.with_protocol_version(version);
        self
    }

    /// Default timeout for every request.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Register handlers for server-initiated requests and notifications
    /// (`roots/list`, `sampling/createMessage`, log messages).
    #[must_use]
    pub fn handlers(
        mut self,
        setup: impl FnOnce(RegistryBuilder) -> RegistryBuilder + Send + 'static,
    ) -> Self {
        self.handlers = Some(Box::new(setup));
        self
    }

    /// Start an engine over `transport` and complete the handshake.
    ///
    /// # Errors
    ///
    /// Transport errors, an error response to `initialize`, or
    /// [`AppError::Handshake`](crate::AppError::Handshake) when the server
    /// chose an unacceptable protocol version.
    pub async fn connect(self, transport: Arc<dyn Transport>) -> Result<Client> {
        let mut negotiator = Negotiator::new(Role::Client, self.info, self.capabilities)
            .with_strict(self.config.strict());
        if let Some(version) = &self.config.protocol_version {
            negotiator = negotiator.with_pinned_version(version.clone());
        }

        let registry = match self.handlers {
            Some(setup) => setup(RegistryBuilder::new()).build(),
            None => RegistryBuilder::new().build(),
        };
        let engine = Engine::new(transport, registry, negotiator, self.config);
        engine.start().await?;

        match handshake(&engine).await {
            Ok(peer) => {
                info!(
                    server = %peer.info.name,
                    protocol_version = %peer.protocol_version,
                    "client connected"
                );
                Ok(Client { engine, peer })
            }
            Err(err) => {
                warn!(%err, "handshake failed");
                engine.close().await;
                Err(err)
            }
        }
    }
}

async fn handshake(engine: &Engine) -> Result<PeerInfo> {
    let params = serde_json::to_value(engine.negotiator().initialize_params())?;
    let result: InitializeResult = engine
        .request(methods::INITIALIZE, Some(params), RequestOptions::new())
        .await?;
    let peer = engine.negotiator().accept_initialize_result(result)?;
    engine.transport().set_protocol_version(&peer.protocol_version);
    engine
        .notify(methods::NOTIFICATIONS_INITIALIZED, None)
        .await?;
    Ok(peer)
}

/// A connected, initialized client.
#[derive(Clone)]
pub struct Client {
    engine: Engine,
    peer: PeerInfo,
}

impl Client {
    /// What the server reported during the handshake.
    #[must_use]
    pub fn server(&self) -> &PeerInfo {
        &self.peer
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Send an arbitrary request.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<R> {
        self.engine.request(method, params, options).await
    }

    /// Send an arbitrary notification.
    ///
    /// # Errors
    ///
    /// See [`Engine::notify`].
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.engine.notify(method, params).await
    }

    /// Start an outbound batch.
    #[must_use]
    pub fn batch(&self) -> BatchBuilder {
        self.engine.batch()
    }

    /// `ping`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn ping(&self) -> Result<()> {
        self.engine
            .request_value(methods::PING, None, RequestOptions::new())
            .await
            .map(drop)
    }

    /// `tools/list`; returns the raw descriptors.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn list_tools(&self) -> Result<Vec<Value>> {
        self.list(methods::TOOLS_LIST, "tools").await
    }

    /// `tools/call`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        options: RequestOptions,
    ) -> Result<ToolResponse> {
        self.engine
            .request(
                methods::TOOLS_CALL,
                Some(json!({"name": name, "arguments": arguments})),
                options,
            )
            .await
    }

    /// `prompts/list`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn list_prompts(&self) -> Result<Vec<Value>> {
        self.list(methods::PROMPTS_LIST, "prompts").await
    }

    /// `prompts/get`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<PromptResult> {
        self.engine
            .request(
                methods::PROMPTS_GET,
                Some(json!({"name": name, "arguments": arguments})),
                RequestOptions::new(),
            )
            .await
    }

    /// `resources/list`.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn list_resources(&self) -> Result<Vec<Value>> {
        self.list(methods::RESOURCES_LIST, "resources").await
    }

    /// `resources/read`; returns the `contents` array.
    ///
    /// # Errors
    ///
    /// See [`Engine::request_value`].
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        let result = self
            .engine
            .request_value(
                methods::RESOURCES_READ,
                Some(json!({"uri": uri})),
                RequestOptions::new(),
            )
            .await?;
        Ok(take_array(result, "contents"))
    }

    /// Close the connection.
    pub async fn close(&self) {
        self.engine.close().await;
    }

    async fn list(&self, method: &str, key: &str) -> Result<Vec<Value>> {
        let result = self
            .engine
            .request_value(method, None, RequestOptions::new())
            .await?;
        Ok(take_array(result, key))
    }
}

fn take_array(mut result: Value, key: &str) -> Vec<Value> {
    match result.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}
