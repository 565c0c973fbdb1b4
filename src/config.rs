//! File configuration for the server binary and the engines it builds.
//!
//! ```toml
//! [server]
//! name = "mcp-engine"
//! strict = true
//! request_timeout_ms = 30000
//!
//! [http]
//! port = 3000
//! path = "/mcp"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::protocol::lifecycle::is_supported_version;
use crate::{AppError, Result};

/// Identity and engine behavior of the served catalog.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Name reported in `serverInfo`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Version reported in `serverInfo`.
    #[serde(default = "default_version")]
    pub version: String,
    /// Usage hints returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Reject traffic before the handshake completes.
    #[serde(default)]
    pub strict: bool,
    /// Protocol version offered when the client asks for an unknown one.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Default timeout for server-initiated requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_name() -> String {
    env!("CARGO_PKG_NAME").to_owned()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            instructions: None,
            strict: false,
            protocol_version: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Streamable HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoint path serving `POST`, `GET` and `DELETE`.
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds between SSE keepalive comments.
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_path() -> String {
    "/".into()
}

fn default_keepalive_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            keepalive_seconds: default_keepalive_seconds(),
        }
    }
}

impl HttpConfig {
    /// Keepalive interval as a [`Duration`].
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Served identity and engine behavior.
    #[serde(default)]
    pub server: ServerConfig,
    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Engine configuration derived from the `[server]` table.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_strict(self.server.strict)
            .with_request_timeout(Duration::from_millis(self.server.request_timeout_ms));
        if let Some(version) = &self.server.protocol_version {
            config = config.with_protocol_version(version.clone());
        }
        config
    }

    fn validate(&self) -> Result<()> {
        if self.server.name.trim().is_empty() {
            return Err(AppError::Config("server.name must not be empty".into()));
        }

        if self.server.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "server.request_timeout_ms must be greater than zero".into(),
            ));
        }

        if let Some(version) = &self.server.protocol_version {
            if !is_supported_version(version) {
                return Err(AppError::Config(format!(
                    "server.protocol_version {version} is not supported"
                )));
            }
        }

        if !self.http.path.starts_with('/') {
            return Err(AppError::Config("http.path must start with '/'".into()));
        }

        if self.http.keepalive_seconds == 0 {
            return Err(AppError::Config(
                "http.keepalive_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
