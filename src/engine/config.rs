//! Per-engine runtime configuration.
//!
//! Each engine owns an [`EngineConfig`]; there is no process-wide default.
//! Layering (library defaults, file config, per-session overrides) goes
//! through the pure [`EngineConfig::merge`] function.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::error;

use crate::protocol::lifecycle::LATEST_PROTOCOL_VERSION;
use crate::AppError;

/// Default resettable request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Receives handler faults along with a JSON context (method, id).
pub type ExceptionReporter = Arc<dyn Fn(&AppError, &Value) + Send + Sync>;

/// Receives one record per inbound request after it completes.
pub type InstrumentationCallback = Arc<dyn Fn(&Instrumentation) + Send + Sync>;

/// Timing and outcome of one handled inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrumentation {
    /// Method that was dispatched.
    pub method: String,
    /// Wall-clock time from receipt to response.
    pub duration: Duration,
    /// JSON-RPC error code when the request failed.
    pub error_code: Option<i64>,
    /// Streamable HTTP session, when there is one.
    pub session_id: Option<String>,
}

/// Engine configuration. Every field is optional so that configs can be
/// layered with [`merge`](Self::merge); accessors apply the defaults.
#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Handler fault sink; faults are logged when unset.
    pub exception_reporter: Option<ExceptionReporter>,
    /// Per-request instrumentation sink.
    pub instrumentation: Option<InstrumentationCallback>,
    /// Protocol version a server prefers when the client asks for an
    /// unknown one, or the version a client pins.
    pub protocol_version: Option<String>,
    /// Reject traffic before the handshake completes.
    pub strict: Option<bool>,
    /// Default resettable timeout for outbound requests.
    pub request_timeout: Option<Duration>,
}

impl Debug for EngineConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("exception_reporter", &self.exception_reporter.is_some())
            .field("instrumentation", &self.instrumentation.is_some())
            .field("protocol_version", &self.protocol_version)
            .field("strict", &self.strict)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl EngineConfig {
    /// Combine two configs; every field set in `other` wins.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            exception_reporter: other
                .exception_reporter
                .clone()
                .or_else(|| self.exception_reporter.clone()),
            instrumentation: other
                .instrumentation
                .clone()
                .or_else(|| self.instrumentation.clone()),
            protocol_version: other
                .protocol_version
                .clone()
                .or_else(|| self.protocol_version.clone()),
            strict: other.strict.or(self.strict),
            request_timeout: other.request_timeout.or(self.request_timeout),
        }
    }

    /// Set strict lifecycle enforcement.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Set the default request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the preferred (server) or pinned (client) protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    /// Set the exception reporter.
    #[must_use]
    pub fn with_exception_reporter(
        mut self,
        reporter: impl Fn(&AppError, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.exception_reporter = Some(Arc::new(reporter));
        self
    }

    /// Set the instrumentation callback.
    #[must_use]
    pub fn with_instrumentation(
        mut self,
        callback: impl Fn(&Instrumentation) + Send + Sync + 'static,
    ) -> Self {
        self.instrumentation = Some(Arc::new(callback));
        self
    }

    /// Whether strict lifecycle enforcement is on (default: lenient).
    #[must_use]
    pub fn strict(&self) -> bool {
        self.strict.unwrap_or(false)
    }

    /// Effective default request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Effective preferred protocol version.
    #[must_use]
    pub fn preferred_protocol_version(&self) -> &str {
        self.protocol_version
            .as_deref()
            .unwrap_or(LATEST_PROTOCOL_VERSION)
    }

    /// Forward a handler fault to the reporter, or log it.
    pub fn report_exception(&self, err: &AppError, context: &Value) {
        match &self.exception_reporter {
            Some(reporter) => reporter(err, context),
            None => error!(%err, %context, "unhandled handler error"),
        }
    }

    /// Emit an instrumentation record when a callback is configured.
    pub fn record(&self, record: &Instrumentation) {
        if let Some(callback) = &self.instrumentation {
            callback(record);
        }
    }
}
