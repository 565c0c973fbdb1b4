//! Server role: a tool, prompt, and resource catalog served over any transport.
//!
//! [`McpServer`] turns its catalog into a [`Registry`] and a server-role
//! [`Negotiator`]. Over stdio it drives one engine; over streamable HTTP it
//! is the engine factory of a [`SessionManager`], one engine per session.

pub mod catalog;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use catalog::{
    Arguments, Prompt, PromptArgument, PromptMessage, PromptResult, Resource, ResourceContents,
    ResourceReader, ResourceTemplate, Tool, ToolResponse,
};

use crate::engine::registry::BoxFuture;
use crate::engine::{
    Engine, EngineConfig, Negotiator, Registry, RegistryBuilder, RequestContext, Role,
};
use crate::http::SessionManager;
use crate::protocol::capabilities::Capabilities;
use crate::protocol::lifecycle::Implementation;
use crate::protocol::message::ErrorObject;
use crate::protocol::methods;
use crate::transport::stdio::StdioTransport;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Adds application handlers on top of the catalog's.
pub type RegistryExtension = Arc<dyn Fn(RegistryBuilder) -> RegistryBuilder + Send + Sync>;

#[derive(Default)]
struct Catalog {
    tools: Vec<Tool>,
    prompts: Vec<Prompt>,
    resources: Vec<Resource>,
    templates: Vec<ResourceTemplate>,
    reader: Option<ResourceReader>,
}

impl Catalog {
    fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    fn prompt(&self, name: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|prompt| prompt.name == name)
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Builder for [`McpServer`].
pub struct McpServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    catalog: Catalog,
    subscribe: bool,
    logging: bool,
    completions: bool,
    config: EngineConfig,
    extension: Option<RegistryExtension>,
}

impl McpServerBuilder {
    /// Add a tool; a later tool with the same name replaces it.
    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.catalog.tools.retain(|t| t.name != tool.name);
        self.catalog.tools.push(tool);
        self
    }

    /// Add a prompt; a later prompt with the same name replaces it.
    #[must_use]
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.catalog.prompts.retain(|p| p.name != prompt.name);
        self.catalog.prompts.push(prompt);
        self
    }

    /// Add a resource.
    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.catalog.resources.push(resource);
        self
    }

    /// Add a resource template.
    #[must_use]
    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.catalog.templates.push(template);
        self
    }

    /// Serve `resources/read` with `reader`. Without one, reads return no contents.
    #[must_use]
    pub fn resource_reader<F, Fut>(mut self, reader: F) -> Self
    where
        F: Fn(String, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<ResourceContents>>> + Send + 'static,
    {
        let reader: ResourceReader = Arc::new(move |uri: String, ctx: RequestContext| {
            let fut: BoxFuture<Result<Vec<ResourceContents>>> = Box::pin(reader(uri, ctx));
            fut
        });
        self.catalog.reader = Some(reader);
        self
    }

    /// Usage hints returned from `initialize`.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Advertise `resources.subscribe`.
    #[must_use]
    pub fn with_subscriptions(mut self) -> Self {
        self.subscribe = true;
        self
    }

    /// Advertise `logging` and accept `logging/setLevel`.
    #[must_use]
    pub fn with_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Advertise `completions` and accept `completion/complete`.
    #[must_use]
    pub fn with_completions(mut self) -> Self {
        self.completions = true;
        self
    }

    /// Engine configuration shared by every connection, layered over
    /// anything set earlier.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = self.config.merge(&config);
        self
    }

    /// Register extra handlers next to the catalog's.
    #[must_use]
    pub fn handlers(
        mut self,
        extension: impl Fn(RegistryBuilder) -> RegistryBuilder + Send + Sync + 'static,
    ) -> Self {
        self.extension = Some(Arc::new(extension));
        self
    }

    /// Freeze the catalog and derive the capability set.
    #[must_use]
    pub fn build(self) -> Arc<McpServer> {
        let catalog = self.catalog;
        let mut capabilities = Capabilities::default();
        if !catalog.tools.is_empty() {
            capabilities = capabilities.with_tools(true);
        }
        if !catalog.prompts.is_empty() {
            capabilities = capabilities.with_prompts(true);
        }
        if self.subscribe
            || !catalog.resources.is_empty()
            || !catalog.templates.is_empty()
            || catalog.reader.is_some()
        {
            capabilities = capabilities.with_resources(self.subscribe, true);
        }
        if self.logging {
            capabilities = capabilities.with_logging();
        }
        if self.completions {
            capabilities = capabilities.with_completions();
        }

        Arc::new(McpServer {
            info: self.info,
            instructions: self.instructions,
            catalog: Arc::new(catalog),
            capabilities,
            config: self.config,
            extension: self.extension,
        })
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A frozen server definition. Each connection gets its own engine.
pub struct McpServer {
    info: Implementation,
    instructions: Option<String>,
    catalog: Arc<Catalog>,
    capabilities: Capabilities,
    config: EngineConfig,
    extension: Option<RegistryExtension>,
}

impl McpServer {
    /// Start a builder for a server called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder {
            info: Implementation::new(name, version),
            instructions: None,
            catalog: Catalog::default(),
            subscribe: false,
            logging: false,
            completions: false,
            config: EngineConfig::default(),
            extension: None,
        }
    }

    /// Server identity.
    #[must_use]
    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Capabilities advertised in `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// A server-role negotiator for one new connection.
    #[must_use]
    pub fn negotiator(&self) -> Negotiator {
        let mut negotiator =
            Negotiator::new(Role::Server, self.info.clone(), self.capabilities.clone())
                .with_strict(self.config.strict())
                .with_preferred_version(self.config.preferred_protocol_version());
        if let Some(instructions) = &self.instructions {
            negotiator = negotiator.with_instructions(instructions.clone());
        }
        negotiator
    }

    /// The dispatch table for one new connection.
    #[must_use]
    pub fn registry(&self) -> Registry {
        let builder = catalog_handlers(RegistryBuilder::new(), &self.catalog);
        match &self.extension {
            Some(extension) => extension(builder).build(),
            None => builder.build(),
        }
    }

    /// An engine serving this catalog over `transport`. Not yet started.
    #[must_use]
    pub fn engine(&self, transport: Arc<dyn Transport>) -> Engine {
        Engine::new(
            transport,
            self.registry(),
            self.negotiator(),
            self.config.clone(),
        )
    }

    /// Serve one client on the process's stdin/stdout until it disconnects
    /// or `ct` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if stdio cannot be attached.
    pub async fn serve_stdio(&self, ct: CancellationToken) -> Result<()> {
        let engine = self.engine(Arc::new(StdioTransport::stdio()));
        engine.start().await?;
        info!(server = %self.info.name, "serving on stdio");

        let closed = engine.closed();
        tokio::select! {
            () = ct.cancelled() => {
                info!("stdio server cancelled");
            }
            () = closed.cancelled() => {
                info!("stdio peer disconnected");
            }
        }
        engine.close().await;
        Ok(())
    }

    /// A session manager that builds one engine from this server per
    /// streamable HTTP session.
    #[must_use]
    pub fn session_manager(self: &Arc<Self>, keepalive: Duration) -> Arc<SessionManager> {
        let server = Arc::clone(self);
        SessionManager::new(
            Arc::new(move |transport: Arc<dyn Transport>| Ok(server.engine(transport))),
            keepalive,
        )
    }
}

// ── Catalog handlers ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NamedCall {
    name: String,
    #[serde(default)]
    arguments: Option<Arguments>,
}

#[derive(Deserialize)]
struct UriParams {
    uri: String,
}

#[derive(Deserialize)]
struct SetLevelParams {
    level: String,
}

/// Domain failure returned to the caller as `InternalError` with `text` as data.
fn domain_error(text: String) -> AppError {
    AppError::Rpc(ErrorObject::internal_error("Internal error").with_data(Value::String(text)))
}

fn catalog_handlers(builder: RegistryBuilder, catalog: &Arc<Catalog>) -> RegistryBuilder {
    let tools = Arc::clone(catalog);
    let calls = Arc::clone(catalog);
    let prompts = Arc::clone(catalog);
    let renders = Arc::clone(catalog);
    let resources = Arc::clone(catalog);
    let templates = Arc::clone(catalog);
    let reads = Arc::clone(catalog);

    builder
        .request(methods::TOOLS_LIST, move |_: Value, _ctx: RequestContext| {
            let listed: Vec<Value> = tools.tools.iter().map(Tool::descriptor).collect();
            async move { Ok(json!({"tools": listed})) }
        })
        .request(methods::TOOLS_CALL, move |call: NamedCall, ctx: RequestContext| {
            let catalog = Arc::clone(&calls);
            async move { call_tool(&catalog, call, ctx).await }
        })
        .request(methods::PROMPTS_LIST, move |_: Value, _ctx: RequestContext| {
            let listed: Vec<Value> = prompts.prompts.iter().map(Prompt::descriptor).collect();
            async move { Ok(json!({"prompts": listed})) }
        })
        .request(methods::PROMPTS_GET, move |call: NamedCall, ctx: RequestContext| {
            let catalog = Arc::clone(&renders);
            async move { get_prompt(&catalog, call, ctx).await }
        })
        .request(methods::RESOURCES_LIST, move |_: Value, _ctx: RequestContext| {
            let listed = resources.resources.clone();
            async move { Ok(json!({"resources": listed})) }
        })
        .request(
            methods::RESOURCES_TEMPLATES_LIST,
            move |_: Value, _ctx: RequestContext| {
                let listed = templates.templates.clone();
                async move { Ok(json!({"resourceTemplates": listed})) }
            },
        )
        .request(methods::RESOURCES_READ, move |params: UriParams, ctx: RequestContext| {
            let reader = reads.reader.clone();
            async move {
                let contents = match reader {
                    Some(reader) => reader(params.uri, ctx).await?,
                    None => Vec::new(),
                };
                Ok(json!({"contents": contents}))
            }
        })
        .request(methods::RESOURCES_SUBSCRIBE, |_: UriParams, _ctx: RequestContext| async {
            Ok(json!({}))
        })
        .request(methods::RESOURCES_UNSUBSCRIBE, |_: UriParams, _ctx: RequestContext| async {
            Ok(json!({}))
        })
        .request(methods::COMPLETION_COMPLETE, |_: Value, _ctx: RequestContext| async {
            Ok(json!({"completion": {"values": [], "hasMore": false}}))
        })
        .request(
            methods::LOGGING_SET_LEVEL,
            |params: SetLevelParams, ctx: RequestContext| async move {
                info!(level = %params.level, session_id = ?ctx.session_id, "client set log level");
                Ok(json!({}))
            },
        )
}

async fn call_tool(catalog: &Catalog, call: NamedCall, ctx: RequestContext) -> Result<ToolResponse> {
    let Some(tool) = catalog.tool(&call.name) else {
        return Err(domain_error(format!("Tool not found {}", call.name)));
    };
    let arguments = call.arguments.unwrap_or_default();

    let missing = tool.missing_arguments(&arguments);
    if !missing.is_empty() {
        return Err(domain_error(format!(
            "Missing required arguments: {}",
            missing.join(", ")
        )));
    }

    let peer = ctx.peer().clone();
    let id = ctx.id.to_value();
    match tool.call(arguments, ctx).await {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(tool = %call.name, %err, "tool failed");
            peer.config()
                .report_exception(&err, &json!({"tool": call.name, "id": id}));
            Err(domain_error(format!("Internal error calling tool {}", call.name)))
        }
    }
}

async fn get_prompt(catalog: &Catalog, call: NamedCall, ctx: RequestContext) -> Result<PromptResult> {
    let Some(prompt) = catalog.prompt(&call.name) else {
        return Err(domain_error(format!("Prompt not found {}", call.name)));
    };
    let arguments = call.arguments.unwrap_or_default();

    let missing = prompt.missing_arguments(&arguments);
    if !missing.is_empty() {
        return Err(domain_error(format!(
            "Missing required arguments: {}",
            missing.join(", ")
        )));
    }
    prompt.render(arguments, ctx).await
}
