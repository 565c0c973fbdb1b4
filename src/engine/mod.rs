//! Symmetric JSON-RPC protocol engine.
//!
//! One [`Engine`] drives one connection. It allocates request ids, owns the
//! pending-request table, runs the inbound read loop, and dispatches inbound
//! requests and notifications through a frozen [`Registry`]. Clients and
//! servers use the same engine; only the [`Negotiator`] role differs.
//!
//! # Lifecycle
//!
//! 1. Build with [`Engine::new`].
//! 2. [`Engine::start`] connects the transport and spawns the read loop.
//!    Push-driven transports (streamable HTTP sessions) skip this and feed
//!    frames through [`Engine::handle_frame`] instead.
//! 3. [`Engine::close`] rejects everything pending exactly once, runs the
//!    close hooks, and disconnects the transport.

pub mod config;
pub mod dispatch;
pub mod negotiator;
pub mod options;
pub mod pending;
pub mod registry;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

pub use config::{EngineConfig, Instrumentation};
pub use negotiator::{LifecycleState, Negotiator, PeerInfo, Role};
pub use options::RequestOptions;
pub use registry::{NotificationContext, Registry, RegistryBuilder, RequestContext};

use self::pending::{PendingTable, ProgressSink, Waiter};
use crate::protocol::message::{Frame, Message, Notification, Request, RequestId};
use crate::transport::Transport;
use crate::{AppError, Result};

type CloseHook = Box<dyn FnOnce() + Send>;

struct EngineInner {
    transport: Arc<dyn Transport>,
    registry: Registry,
    negotiator: Arc<Negotiator>,
    config: EngineConfig,
    pending: Arc<PendingTable>,
    next_id: AtomicI64,
    closing: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
    shutdown: CancellationToken,
}

/// Handle to one protocol connection. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine over `transport`. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Registry,
        negotiator: Negotiator,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                registry,
                negotiator: Arc::new(negotiator),
                config,
                pending: Arc::new(PendingTable::new()),
                next_id: AtomicI64::new(1),
                closing: AtomicBool::new(false),
                close_hooks: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Connect the transport and spawn the read loop.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it cannot connect or its inbound
    /// stream was already taken.
    pub async fn start(&self) -> Result<()> {
        self.inner.transport.connect().await?;
        let inbound = self.inner.transport.receive()?;

        let role = self.inner.negotiator.role();
        let engine = self.clone();
        tokio::spawn(
            async move { engine.read_loop(inbound).await }
                .instrument(info_span!("engine_read_loop", role = ?role)),
        );
        debug!(role = ?role, "engine started");
        Ok(())
    }

    // ── Outbound ────────────────────────────────────────────────────────────

    /// Send a request and decode its result as `R`.
    ///
    /// # Errors
    ///
    /// See [`request_value`](Self::request_value); additionally
    /// [`AppError::Parse`] when the result does not decode as `R`.
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<R> {
        let value = self.request_value(method, params, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request and wait for its raw result.
    ///
    /// # Errors
    ///
    /// - [`AppError::Rpc`] when the peer answers with an error.
    /// - [`AppError::Timeout`] / [`AppError::MaxTotalTimeout`] when a deadline passes.
    /// - [`AppError::ConnectionClosed`] when the engine closes first.
    /// - Gating and transport errors before anything is sent.
    pub async fn request_value(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let waiter = self.begin_request(method, params, &options).await?;
        waiter.wait().await
    }

    async fn begin_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Waiter> {
        let (request, waiter) = self.register(method, params, options)?;
        let frame = Frame::Single(Message::Request(request)).encode()?;
        self.write_registered(frame, std::slice::from_ref(waiter.id()))
            .await?;
        Ok(waiter)
    }

    /// Gate, allocate an id, and insert the pending entry. The entry exists
    /// before any byte is written.
    fn register(
        &self,
        method: &str,
        params: Option<Value>,
        options: &RequestOptions,
    ) -> Result<(Request, Waiter)> {
        self.inner.negotiator.gate_outbound_request(method)?;
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (params, sink) = match &options.on_progress {
            Some(callback) => {
                let params = attach_progress_token(params, id.to_value())?;
                let reset = options
                    .reset_timeout_on_progress
                    .then(|| Arc::new(Notify::new()));
                let sink = ProgressSink {
                    callback: Arc::clone(callback),
                    reset,
                };
                (Some(params), Some(sink))
            }
            None => (params, None),
        };

        let reset = sink.as_ref().and_then(|sink| sink.reset.clone());
        let rx = self.inner.pending.insert(id.clone(), sink);
        let waiter = Waiter::new(
            Arc::clone(&self.inner.pending),
            id.clone(),
            rx,
            options
                .timeout
                .unwrap_or_else(|| self.inner.config.request_timeout()),
            options.max_total_timeout,
            reset,
        );

        // Close may have drained the table between the check and the insert.
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }
        Ok((Request::new(id, method, params), waiter))
    }

    /// Write a frame whose requests are already registered. On failure each
    /// entry is removed; the error surfaces only if this call removed at
    /// least one of them, otherwise a response already settled them.
    async fn write_registered(&self, frame: String, ids: &[RequestId]) -> Result<()> {
        match self.inner.transport.send(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut removed = false;
                for id in ids {
                    removed |= self.inner.pending.remove(id);
                }
                if removed {
                    Err(err)
                } else {
                    debug!(%err, "send failed after the response arrived");
                    Ok(())
                }
            }
        }
    }

    /// Send a notification.
    ///
    /// # Errors
    ///
    /// Gating errors in strict mode, [`AppError::ConnectionClosed`] after
    /// close, or the transport's write error.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.inner.negotiator.gate_outbound_notification(method)?;
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }
        let frame = Frame::Single(Message::Notification(Notification::new(method, params)))
            .encode()?;
        self.inner.transport.send(frame).await
    }

    /// Start an outbound batch.
    #[must_use]
    pub fn batch(&self) -> BatchBuilder {
        BatchBuilder {
            engine: self.clone(),
            items: Vec::new(),
        }
    }

    // ── Close ───────────────────────────────────────────────────────────────

    /// Close the connection. Only the first call has any effect: it rejects
    /// every pending request with [`AppError::ConnectionClosed`], runs the
    /// close hooks, and disconnects the transport.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        let rejected = self.inner.pending.reject_all(&AppError::ConnectionClosed);

        let hooks = std::mem::take(
            &mut *self
                .inner
                .close_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }

        self.inner.transport.disconnect().await;
        info!(
            role = ?self.inner.negotiator.role(),
            rejected,
            "engine closed"
        );
    }

    /// Run `hook` once when the engine closes; immediately if it already has.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut hooks = self
                .inner
                .close_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.inner.closing.load(Ordering::SeqCst) {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Token cancelled when the engine closes.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Streamable HTTP session id of the underlying transport.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.transport.session_id()
    }

    /// Handshake state for this connection.
    #[must_use]
    pub fn negotiator(&self) -> &Negotiator {
        &self.inner.negotiator
    }

    /// This engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The transport this engine writes to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }
}

// ── Batches ───────────────────────────────────────────────────────────────────

enum BatchItem {
    Request {
        method: String,
        params: Option<Value>,
        options: RequestOptions,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

/// Collects requests and notifications into one outbound array frame.
pub struct BatchBuilder {
    engine: Engine,
    items: Vec<BatchItem>,
}

impl BatchBuilder {
    /// Add a request.
    #[must_use]
    pub fn request(mut self, method: &str, params: Option<Value>, options: RequestOptions) -> Self {
        self.items.push(BatchItem::Request {
            method: method.to_owned(),
            params,
            options,
        });
        self
    }

    /// Add a notification.
    #[must_use]
    pub fn notify(mut self, method: &str, params: Option<Value>) -> Self {
        self.items.push(BatchItem::Notification {
            method: method.to_owned(),
            params,
        });
        self
    }

    /// Register every request, write the array, and return one
    /// [`PendingCall`] per request in insertion order.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidParams`] for an empty batch, gating errors, or the
    /// transport's write error (every entry is then withdrawn).
    pub async fn send(self) -> Result<Vec<PendingCall>> {
        if self.items.is_empty() {
            return Err(AppError::InvalidParams("batch must not be empty".into()));
        }

        let mut messages = Vec::with_capacity(self.items.len());
        let mut calls = Vec::new();
        for item in self.items {
            match item {
                BatchItem::Request {
                    method,
                    params,
                    options,
                } => {
                    // A failed registration drops earlier waiters, which withdraws their entries.
                    let (request, waiter) = self.engine.register(&method, params, &options)?;
                    messages.push(Message::Request(request));
                    calls.push(PendingCall { waiter });
                }
                BatchItem::Notification { method, params } => {
                    self.engine
                        .inner
                        .negotiator
                        .gate_outbound_notification(&method)?;
                    messages.push(Message::Notification(Notification::new(method, params)));
                }
            }
        }

        let frame = Frame::Batch(messages).encode()?;
        let ids: Vec<RequestId> = calls.iter().map(|call| call.waiter.id().clone()).collect();
        self.engine.write_registered(frame, &ids).await?;
        Ok(calls)
    }
}

/// One request of a sent batch.
pub struct PendingCall {
    waiter: Waiter,
}

impl PendingCall {
    /// Id allocated for this request.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        self.waiter.id()
    }

    /// Wait for the raw result.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::request_value`].
    pub async fn wait(self) -> Result<Value> {
        self.waiter.wait().await
    }

    /// Wait and decode the result as `R`.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::request`].
    pub async fn wait_as<R: DeserializeOwned>(self) -> Result<R> {
        Ok(serde_json::from_value(self.wait().await?)?)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Merge `progressToken` into `params._meta`, keeping every other key.
fn attach_progress_token(params: Option<Value>, token: Value) -> Result<Value> {
    let mut params = params.unwrap_or_else(|| json!({}));
    let Value::Object(map) = &mut params else {
        return Err(AppError::InvalidParams(
            "params must be an object to carry a progress token".into(),
        ));
    };
    let meta = map.entry("_meta").or_insert_with(|| json!({}));
    let Value::Object(meta) = meta else {
        return Err(AppError::InvalidParams("_meta must be an object".into()));
    };
    meta.insert("progressToken".to_owned(), token);
    Ok(params)
}
