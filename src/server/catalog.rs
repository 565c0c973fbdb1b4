//! Tools, prompts, and resources a server exposes.
//!
//! Catalog entries serialize to the descriptors returned by the `*/list`
//! methods. Handlers are erased into boxed futures so entries of different
//! closure types can live in one map.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::engine::registry::{BoxFuture, RequestContext};
use crate::Result;

/// Tool arguments as received in `tools/call`.
pub type Arguments = Map<String, Value>;

/// Erased tool handler.
pub type ToolHandler =
    Arc<dyn Fn(Arguments, RequestContext) -> BoxFuture<Result<ToolResponse>> + Send + Sync>;

/// Erased prompt renderer.
pub type PromptHandler =
    Arc<dyn Fn(Arguments, RequestContext) -> BoxFuture<Result<PromptResult>> + Send + Sync>;

/// Erased `resources/read` handler.
pub type ResourceReader =
    Arc<dyn Fn(String, RequestContext) -> BoxFuture<Result<Vec<ResourceContents>>> + Send + Sync>;

// ── Tools ─────────────────────────────────────────────────────────────────────

/// Result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Content blocks (`{"type": "text", "text": ...}` and friends).
    pub content: Vec<Value>,
    /// Whether the tool reports a failure in-band.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResponse {
    /// A single text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({"type": "text", "text": text.into()})],
            is_error: false,
        }
    }

    /// A single text block flagged as an in-band error.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }
}

/// A callable tool.
#[derive(Clone)]
pub struct Tool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
    handler: ToolHandler,
}

impl Debug for Tool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Build a tool. Without a schema the tool accepts any object.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResponse>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args: Arguments, ctx: RequestContext| {
            let fut: BoxFuture<Result<ToolResponse>> = Box::pin(handler(args, ctx));
            fut
        });
        Self {
            name: name.into(),
            description: None,
            input_schema: json!({"type": "object"}),
            handler,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Names in the schema's `required` list that `arguments` lacks.
    #[must_use]
    pub fn missing_arguments(&self, arguments: &Arguments) -> Vec<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|name| !arguments.contains_key(*name))
            .map(str::to_owned)
            .collect()
    }

    pub(crate) fn call(
        &self,
        arguments: Arguments,
        ctx: RequestContext,
    ) -> BoxFuture<Result<ToolResponse>> {
        (self.handler)(arguments, ctx)
    }

    /// Descriptor returned by `tools/list`.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        let mut out = json!({"name": self.name, "inputSchema": self.input_schema});
        if let Some(description) = &self.description {
            out["description"] = json!(description);
        }
        out
    }
}

// ── Prompts ───────────────────────────────────────────────────────────────────

/// One declared prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether `prompts/get` must supply it.
    #[serde(default)]
    pub required: bool,
}

impl PromptArgument {
    /// A required argument.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
        }
    }

    /// An optional argument.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// A content block.
    pub content: Value,
}

impl PromptMessage {
    /// A text message from `role`.
    #[must_use]
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: json!({"type": "text", "text": text.into()}),
        }
    }
}

/// `prompts/get` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    /// Description of the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// A prompt template.
#[derive(Clone)]
pub struct Prompt {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Declared arguments.
    pub arguments: Vec<PromptArgument>,
    handler: PromptHandler,
}

impl Debug for Prompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl Prompt {
    /// Build a prompt rendered by `handler`.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PromptResult>> + Send + 'static,
    {
        let handler: PromptHandler = Arc::new(move |args: Arguments, ctx: RequestContext| {
            let fut: BoxFuture<Result<PromptResult>> = Box::pin(handler(args, ctx));
            fut
        });
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            handler,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare an argument.
    #[must_use]
    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Required arguments that `arguments` lacks.
    #[must_use]
    pub fn missing_arguments(&self, arguments: &Arguments) -> Vec<String> {
        self.arguments
            .iter()
            .filter(|arg| arg.required && !arguments.contains_key(&arg.name))
            .map(|arg| arg.name.clone())
            .collect()
    }

    pub(crate) fn render(
        &self,
        arguments: Arguments,
        ctx: RequestContext,
    ) -> BoxFuture<Result<PromptResult>> {
        (self.handler)(arguments, ctx)
    }

    /// Descriptor returned by `prompts/list`.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        let mut out = json!({"name": self.name, "arguments": self.arguments});
        if let Some(description) = &self.description {
            out["description"] = json!(description);
        }
        out
    }
}

// ── Resources ─────────────────────────────────────────────────────────────────

/// A concrete resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    /// A resource with no description or MIME type.
    #[must_use]
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A parameterized family of resources (RFC 6570 URI template).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// URI template.
    pub uri_template: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of matching resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceTemplate {
    /// A template with no description or MIME type.
    #[must_use]
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI the contents belong to.
    pub uri: String,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Text contents for `uri`.
    #[must_use]
    pub fn text(uri: impl Into<String>, mime_type: Option<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type,
            text: Some(text.into()),
            blob: None,
        }
    }
}
