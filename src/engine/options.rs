//! Per-request options: deadlines and progress.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::lifecycle::Progress;

/// Receives `notifications/progress` updates for one outbound request.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Options for [`Engine::request`](super::Engine::request).
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Resettable timeout; the engine default applies when `None`.
    pub timeout: Option<Duration>,
    /// Hard cap on total wall-clock time, never reset by progress.
    pub max_total_timeout: Option<Duration>,
    /// Restart the resettable timeout on each matching progress update.
    pub reset_timeout_on_progress: bool,
    /// Progress sink; setting it injects a progress token into `params._meta`.
    pub on_progress: Option<ProgressCallback>,
}

impl Debug for RequestOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("timeout", &self.timeout)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl RequestOptions {
    /// Options with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the resettable timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap total wall-clock time.
    #[must_use]
    pub fn with_max_total_timeout(mut self, limit: Duration) -> Self {
        self.max_total_timeout = Some(limit);
        self
    }

    /// Restart the resettable timeout whenever progress arrives.
    #[must_use]
    pub fn reset_timeout_on_progress(mut self) -> Self {
        self.reset_timeout_on_progress = true;
        self
    }

    /// Receive progress updates.
    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}
