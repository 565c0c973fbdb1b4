//! MCP method names and the static method → capability map.

/// Handshake request.
pub const INITIALIZE: &str = "initialize";
/// Liveness probe; answered with an empty object.
pub const PING: &str = "ping";
/// Sent by the client once it has processed the `initialize` result.
pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";
/// Progress update correlated by `progressToken`.
pub const NOTIFICATIONS_PROGRESS: &str = "notifications/progress";
/// Peer abandoned an in-flight request.
pub const NOTIFICATIONS_CANCELLED: &str = "notifications/cancelled";
/// Server log message.
pub const NOTIFICATIONS_MESSAGE: &str = "notifications/message";
/// Tool catalog changed.
pub const NOTIFICATIONS_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
/// Prompt catalog changed.
pub const NOTIFICATIONS_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
/// Resource catalog changed.
pub const NOTIFICATIONS_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
/// A subscribed resource changed.
pub const NOTIFICATIONS_RESOURCES_UPDATED: &str = "notifications/resources/updated";
/// Client roots changed.
pub const NOTIFICATIONS_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";

/// List tools.
pub const TOOLS_LIST: &str = "tools/list";
/// Invoke a tool.
pub const TOOLS_CALL: &str = "tools/call";
/// List prompts.
pub const PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt.
pub const PROMPTS_GET: &str = "prompts/get";
/// List resources.
pub const RESOURCES_LIST: &str = "resources/list";
/// List resource templates.
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// Read a resource.
pub const RESOURCES_READ: &str = "resources/read";
/// Subscribe to resource updates.
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
/// Cancel a resource subscription.
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
/// Server asks the client to sample an LLM.
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
/// Argument completion.
pub const COMPLETION_COMPLETE: &str = "completion/complete";
/// Adjust server log level.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// Server asks the client for its roots.
pub const ROOTS_LIST: &str = "roots/list";

/// A capability flag a method depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `tools`
    Tools,
    /// `prompts`
    Prompts,
    /// `resources`
    Resources,
    /// `resources` with the nested `subscribe` flag.
    ResourcesSubscribe,
    /// `logging`
    Logging,
    /// `sampling`
    Sampling,
    /// `completions`
    Completions,
    /// `roots`
    Roots,
}

impl Capability {
    /// Dotted capability path used in error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Prompts => "prompts",
            Self::Resources => "resources",
            Self::ResourcesSubscribe => "resources.subscribe",
            Self::Logging => "logging",
            Self::Sampling => "sampling",
            Self::Completions => "completions",
            Self::Roots => "roots",
        }
    }
}

/// The capability `method` requires, or `None` if it is always available.
#[must_use]
pub fn required_capability(method: &str) -> Option<Capability> {
    match method {
        PROMPTS_GET | PROMPTS_LIST | NOTIFICATIONS_PROMPTS_LIST_CHANGED => Some(Capability::Prompts),
        RESOURCES_LIST
        | RESOURCES_TEMPLATES_LIST
        | RESOURCES_READ
        | RESOURCES_UNSUBSCRIBE
        | NOTIFICATIONS_RESOURCES_LIST_CHANGED
        | NOTIFICATIONS_RESOURCES_UPDATED => Some(Capability::Resources),
        RESOURCES_SUBSCRIBE => Some(Capability::ResourcesSubscribe),
        TOOLS_CALL | TOOLS_LIST | NOTIFICATIONS_TOOLS_LIST_CHANGED => Some(Capability::Tools),
        SAMPLING_CREATE_MESSAGE => Some(Capability::Sampling),
        COMPLETION_COMPLETE => Some(Capability::Completions),
        LOGGING_SET_LEVEL | NOTIFICATIONS_MESSAGE => Some(Capability::Logging),
        ROOTS_LIST | NOTIFICATIONS_ROOTS_LIST_CHANGED => Some(Capability::Roots),
        _ => None,
    }
}

/// Whether `method` may run before the lifecycle reaches `Ready`.
#[must_use]
pub fn allowed_before_ready(method: &str) -> bool {
    matches!(method, INITIALIZE | PING)
}
