//! `initialize` handshake payloads, protocol versions, and progress params.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capabilities::Capabilities;

/// Newest protocol revision this crate speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every revision this crate accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Whether `version` is one this crate understands.
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Responder side of version negotiation.
///
/// Returns `requested` when it is supported, otherwise `preferred` (the
/// responder's own latest or configured version).
#[must_use]
pub fn negotiate_version(requested: &str, preferred: &str) -> String {
    if is_supported_version(requested) {
        requested.to_owned()
    } else {
        preferred.to_owned()
    }
}

/// Name and version of an MCP implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

impl Implementation {
    /// Build an implementation descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// `initialize` request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Version the client asks for.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Client identity.
    pub client_info: Implementation,
}

/// `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Version chosen by the server.
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Server identity.
    pub server_info: Implementation,
    /// Optional usage hints for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// `notifications/progress` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Token copied from the originating request's `_meta.progressToken`.
    pub progress_token: Value,
    /// Progress so far; increases monotonically.
    pub progress: f64,
    /// Total amount of work, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
