//! Closed dispatch table: method name → handler.
//!
//! Handlers are registered on a [`RegistryBuilder`] and frozen into a
//! [`Registry`] when the engine is built. A method with no entry is an
//! explicit `MethodNotFound`; there is no fallthrough handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::Engine;
use crate::protocol::lifecycle::Progress;
use crate::protocol::message::RequestId;
use crate::protocol::methods;
use crate::{AppError, Result};

/// Boxed, sendable future returned by erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Erased request handler.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<Result<Value>> + Send + Sync>;

/// Erased notification handler.
pub type NotificationHandler =
    Arc<dyn Fn(Option<Value>, NotificationContext) -> BoxFuture<Result<()>> + Send + Sync>;

// ── Handler contexts ─────────────────────────────────────────────────────────

/// What a request handler knows about the call it is serving.
#[derive(Clone)]
pub struct RequestContext {
    /// Id of the inbound request.
    pub id: RequestId,
    /// Method being served.
    pub method: String,
    /// The request's `params._meta`, when present.
    pub meta: Option<Value>,
    /// Streamable HTTP session, when there is one.
    pub session_id: Option<String>,
    peer: Engine,
}

impl RequestContext {
    pub(crate) fn new(
        id: RequestId,
        method: String,
        meta: Option<Value>,
        session_id: Option<String>,
        peer: Engine,
    ) -> Self {
        Self {
            id,
            method,
            meta,
            session_id,
            peer,
        }
    }

    /// Engine connected to the caller; use it to notify or request back.
    #[must_use]
    pub fn peer(&self) -> &Engine {
        &self.peer
    }

    /// The caller's progress token, if it asked for progress.
    #[must_use]
    pub fn progress_token(&self) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.get("progressToken"))
    }

    /// Send `notifications/progress` for this request. Does nothing when the
    /// caller supplied no progress token.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the notification cannot be written.
    pub async fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()> {
        let Some(token) = self.progress_token().cloned() else {
            return Ok(());
        };
        let params = Progress {
            progress_token: token,
            progress,
            total,
            message,
        };
        self.peer
            .notify(methods::NOTIFICATIONS_PROGRESS, Some(serde_json::to_value(params)?))
            .await
    }
}

/// What a notification handler knows about the notification it received.
#[derive(Clone)]
pub struct NotificationContext {
    /// Notification method.
    pub method: String,
    /// Streamable HTTP session, when there is one.
    pub session_id: Option<String>,
    peer: Engine,
}

impl NotificationContext {
    pub(crate) fn new(method: String, session_id: Option<String>, peer: Engine) -> Self {
        Self {
            method,
            session_id,
            peer,
        }
    }

    /// Engine connected to the sender.
    #[must_use]
    pub fn peer(&self) -> &Engine {
        &self.peer
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

struct RequestEntry {
    handler: RequestHandler,
    params_type: &'static str,
}

/// Frozen dispatch table.
pub struct Registry {
    requests: HashMap<String, RequestEntry>,
    notifications: HashMap<String, Vec<NotificationHandler>>,
}

impl Registry {
    /// Handler for `method`, if registered.
    #[must_use]
    pub fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).map(|entry| Arc::clone(&entry.handler))
    }

    /// Notification handlers for `method`, in registration order.
    #[must_use]
    pub fn notification_handlers(&self, method: &str) -> Vec<NotificationHandler> {
        self.notifications.get(method).cloned().unwrap_or_default()
    }

    /// Registered request methods with the Rust type of their params, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<(&str, &'static str)> {
        let mut out: Vec<_> = self
            .requests
            .iter()
            .map(|(method, entry)| (method.as_str(), entry.params_type))
            .collect();
        out.sort_unstable();
        out
    }

    /// Whether a request handler exists for `method`.
    #[must_use]
    pub fn handles(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }
}

/// Builder for a [`Registry`]. `ping` is pre-registered.
pub struct RegistryBuilder {
    requests: HashMap<String, RequestEntry>,
    notifications: HashMap<String, Vec<NotificationHandler>>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder with only the `ping` handler.
    #[must_use]
    pub fn new() -> Self {
        let builder = Self {
            requests: HashMap::new(),
            notifications: HashMap::new(),
        };
        builder.request(methods::PING, |_: Value, _ctx: RequestContext| async {
            Ok(json!({}))
        })
    }

    /// Register a typed request handler, replacing any earlier one.
    ///
    /// Absent params decode from `{}`. Params that fail to decode produce
    /// `InvalidParams` without calling the handler.
    #[must_use]
    pub fn request<P, R, F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let erased: RequestHandler =
            Arc::new(move |params: Option<Value>, ctx: RequestContext| {
                let call: BoxFuture<Result<Value>> = match decode_params::<P>(params) {
                    Ok(params) => {
                        let fut = handler(params, ctx);
                        Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) })
                    }
                    Err(err) => Box::pin(async move { Err(err) }),
                };
                call
            });
        self.requests.insert(
            method.to_owned(),
            RequestEntry {
                handler: erased,
                params_type: std::any::type_name::<P>(),
            },
        );
        self
    }

    /// Append a notification handler for `method`. Handlers for one method
    /// run in the order they were added.
    #[must_use]
    pub fn notification<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Option<Value>, NotificationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let erased: NotificationHandler =
            Arc::new(move |params: Option<Value>, ctx: NotificationContext| {
                let fut: BoxFuture<Result<()>> = Box::pin(handler(params, ctx));
                fut
            });
        self.notifications
            .entry(method.to_owned())
            .or_default()
            .push(erased);
        self
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> Registry {
        Registry {
            requests: self.requests,
            notifications: self.notifications,
        }
    }
}

fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| AppError::InvalidParams(err.to_string()))
}
