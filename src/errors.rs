//! Error types shared across the engine, transports, and roles.

use std::fmt::{Display, Formatter};

use crate::protocol::message::ErrorObject;

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Transport fault: connection refused, broken pipe, EOF, or a closed channel.
    Transport(String),
    /// Transient "resource temporarily unavailable" condition; retried by read loops.
    WouldBlock(String),
    /// Malformed JSON or a structurally invalid JSON-RPC message.
    Parse(String),
    /// Request parameters did not match the handler's expected shape.
    InvalidParams(String),
    /// JSON-RPC error object returned by the peer or produced by the protocol layer.
    Rpc(ErrorObject),
    /// Method requires a capability that was not advertised.
    MissingCapability {
        /// Method that was gated.
        method: String,
        /// Dotted capability path, e.g. `resources.subscribe`.
        capability: String,
        /// Which side lacks the capability (`Server` or `Client`).
        side: &'static str,
    },
    /// Method (named in the payload) invoked before the lifecycle reached `Ready`.
    NotInitialized(String),
    /// `initialize` handshake failure (version mismatch, repeated initialize).
    Handshake(String),
    /// Resettable request timeout elapsed.
    Timeout(String),
    /// Non-resettable total timeout elapsed.
    MaxTotalTimeout(String),
    /// The connection closed while the request was pending.
    ConnectionClosed,
    /// Streamable HTTP session failure.
    Session(String),
    /// Application handler failure.
    Handler(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::WouldBlock(msg) => write!(f, "would block: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Rpc(err) => write!(f, "rpc: {} ({})", err.message, err.code),
            Self::MissingCapability {
                method,
                capability,
                side,
            } => write!(
                f,
                "capability: {side} does not support {capability} (required for {method})"
            ),
            Self::NotInitialized(msg) => write!(f, "not initialized: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: Request timed out ({msg})"),
            Self::MaxTotalTimeout(msg) => {
                write!(f, "timeout: Maximum total timeout exceeded ({msg})")
            }
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error is a transient condition the caller should retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock(_))
    }

    /// Map this error onto the JSON-RPC error object sent back for `method`.
    ///
    /// Protocol-level errors keep their codes. Capability faults and every
    /// other failure become `InternalError` with a human-readable `data`
    /// string describing the specific condition.
    #[must_use]
    pub fn to_error_object(&self, method: &str) -> ErrorObject {
        match self {
            Self::Rpc(err) => err.clone(),
            Self::InvalidParams(msg) => ErrorObject::invalid_params(msg.clone()),
            Self::NotInitialized(gated) => {
                ErrorObject::invalid_request("not initialized").with_data(gated.clone().into())
            }
            Self::MissingCapability {
                method,
                capability,
                side,
            } => {
                let text = format!("{side} does not support {capability} (required for {method})");
                ErrorObject::internal_error(text.clone()).with_data(text.into())
            }
            other => ErrorObject::internal_error(format!("Internal error handling {method} request"))
                .with_data(other.to_string().into()),
        }
    }

    /// Whether the error originated inside application code and should be
    /// forwarded to the exception reporter.
    #[must_use]
    pub fn is_handler_fault(&self) -> bool {
        !matches!(
            self,
            Self::Rpc(_)
                | Self::InvalidParams(_)
                | Self::NotInitialized(_)
                | Self::MissingCapability { .. }
        )
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
                Self::WouldBlock(err.to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<ErrorObject> for AppError {
    fn from(err: ErrorObject) -> Self {
        Self::Rpc(err)
    }
}
