//! Inbound frame dispatch.
//!
//! Per received frame:
//!
//! | Frame                         | Handling                                          |
//! |-------------------------------|---------------------------------------------------|
//! | invalid JSON                  | `ParseError` reply with a `null` id               |
//! | `[]`                          | `InvalidRequest` reply with a `null` id           |
//! | response (or all-response batch) | settled inline, in receipt order               |
//! | request                       | gated, handled, exactly one reply                 |
//! | `notifications/progress`      | routed on the read loop, ahead of later responses |
//! | notification                  | gated, every handler in registration order        |
//! | batch with requests           | members handled concurrently, replies in one array|
//!
//! Requests and notifications run on spawned tasks so a slow handler never
//! stalls the read loop.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn, Instrument};

use super::config::Instrumentation;
use super::registry::{NotificationContext, RequestContext};
use super::{Engine, Role};
use crate::protocol::lifecycle::{InitializeParams, Progress};
use crate::protocol::message::{
    ErrorObject, Malformed, Message, Notification, Outcome, Request, RequestId, Response,
};
use crate::protocol::methods;
use crate::{AppError, Result};

impl Engine {
    /// Drive the inbound stream until the transport or engine closes.
    pub(crate) async fn read_loop(self, mut inbound: mpsc::Receiver<String>) {
        let transport_closed = self.inner.transport.closed();
        let shutdown = self.inner.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                // Drain queued frames before reacting to transport close.
                frame = inbound.recv() => match frame {
                    Some(raw) => self.accept(&raw),
                    None => {
                        debug!("inbound stream ended");
                        break;
                    }
                },

                () = transport_closed.cancelled() => {
                    debug!("transport closed");
                    break;
                }
            }
        }

        self.close().await;
    }

    /// Route one frame from the read loop.
    fn accept(&self, raw: &str) {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "inbound frame is not valid JSON");
                let reply = encode_reply(&Response::error(
                    None,
                    ErrorObject::parse_error(err.to_string()),
                ));
                self.spawn_reply(reply);
                return;
            }
        };

        if is_response_only(&value) {
            // Responses settle in receipt order on the read loop itself.
            match value {
                Value::Array(items) => {
                    for item in items {
                        self.accept_response(item);
                    }
                }
                other => self.accept_response(other),
            }
            return;
        }

        if is_progress(&value) {
            // Progress must land before the response that follows it.
            self.route_progress(value.get("params"));
            if self
                .inner
                .registry
                .notification_handlers(methods::NOTIFICATIONS_PROGRESS)
                .is_empty()
            {
                return;
            }
            let engine = self.clone();
            let params = value.get("params").cloned();
            tokio::spawn(async move {
                engine
                    .run_notification_handlers(methods::NOTIFICATIONS_PROGRESS.to_owned(), params)
                    .await;
            });
            return;
        }

        // Requests that follow `initialized` must see the Ready state.
        if self.inner.negotiator.role() == Role::Server && is_initialized_notification(&value) {
            self.inner.negotiator.mark_peer_initialized();
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let reply = engine.handle_value(value).await;
            engine.send_reply(reply).await;
        });
    }

    fn accept_response(&self, value: Value) {
        match Message::from_value(value) {
            Ok(Message::Response(response)) => self.resolve_response(response),
            Ok(_) => {}
            Err(malformed) => warn!(reason = %malformed.reason, "dropping malformed response"),
        }
    }

    fn spawn_reply(&self, reply: Option<String>) {
        let engine = self.clone();
        tokio::spawn(async move { engine.send_reply(reply).await });
    }

    async fn send_reply(&self, reply: Option<String>) {
        let Some(frame) = reply else {
            return;
        };
        if let Err(err) = self.inner.transport.send(frame).await {
            warn!(%err, "failed to write reply");
        }
    }

    /// Process one inbound frame to completion and return the reply frame,
    /// if the frame produced one.
    ///
    /// The streamable HTTP server calls this directly for each `POST` body.
    pub async fn handle_frame(&self, raw: &str) -> Option<String> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.handle_value(value).await,
            Err(err) => {
                warn!(%err, "inbound frame is not valid JSON");
                encode_reply(&Response::error(
                    None,
                    ErrorObject::parse_error(err.to_string()),
                ))
            }
        }
    }

    async fn handle_value(&self, value: Value) -> Option<String> {
        match value {
            Value::Array(items) if items.is_empty() => encode_reply(&Response::error(
                None,
                ErrorObject::invalid_request("batch must not be empty"),
            )),
            Value::Array(items) => {
                let replies: Vec<Response> =
                    join_all(items.into_iter().map(|item| self.dispatch_value(item)))
                        .await
                        .into_iter()
                        .flatten()
                        .collect();
                if replies.is_empty() {
                    None
                } else {
                    encode_reply(&replies)
                }
            }
            other => self
                .dispatch_value(other)
                .await
                .and_then(|reply| encode_reply(&reply)),
        }
    }

    async fn dispatch_value(&self, value: Value) -> Option<Response> {
        match Message::from_value(value) {
            Ok(Message::Request(request)) => Some(self.handle_request(request).await),
            Ok(Message::Notification(notification)) => {
                self.handle_notification(notification).await;
                None
            }
            Ok(Message::Response(response)) => {
                self.resolve_response(response);
                None
            }
            Err(Malformed {
                id: Some(id),
                reason,
            }) => {
                warn!(%id, %reason, "malformed request");
                Some(Response::error(Some(id), ErrorObject::invalid_request(reason)))
            }
            Err(Malformed { id: None, reason }) => {
                warn!(%reason, "dropping malformed message without a recoverable id");
                None
            }
        }
    }

    // ── Responses ───────────────────────────────────────────────────────────

    fn resolve_response(&self, response: Response) {
        let Some(id) = response.id.clone() else {
            warn!(?response, "peer reported an error without an id");
            return;
        };
        if !self.inner.pending.resolve(&id, response.into_result()) {
            debug!(%id, "no pending request for response; dropped");
        }
    }

    // ── Requests ────────────────────────────────────────────────────────────

    async fn handle_request(&self, request: Request) -> Response {
        let started = Instant::now();
        let id = request.id.clone();
        let method = request.method.clone();

        let span = info_span!("rpc_request", method = %method, id = %id);
        let outcome = self.run_request(request).instrument(span).await;

        let response = match outcome {
            Ok(result) => Response::success(id.clone(), result),
            Err(err) => {
                if err.is_handler_fault() {
                    self.inner
                        .config
                        .report_exception(&err, &json!({"method": method, "id": id.to_value()}));
                } else {
                    debug!(%method, %id, %err, "request rejected");
                }
                Response::error(Some(id), err.to_error_object(&method))
            }
        };

        let error_code = match &response.outcome {
            Outcome::Error(err) => Some(err.code),
            Outcome::Result(_) => None,
        };
        self.inner.config.record(&Instrumentation {
            method,
            duration: started.elapsed(),
            error_code,
            session_id: self.session_id(),
        });
        response
    }

    async fn run_request(&self, request: Request) -> Result<Value> {
        let negotiator = &self.inner.negotiator;
        negotiator.gate_inbound_request(&request.method)?;

        if request.method == methods::INITIALIZE && negotiator.role() == Role::Server {
            let params: InitializeParams =
                serde_json::from_value(request.params.unwrap_or_else(|| json!({})))
                    .map_err(|err| AppError::InvalidParams(err.to_string()))?;
            let result = negotiator.handle_initialize(params)?;
            self.inner
                .transport
                .set_protocol_version(&result.protocol_version);
            return Ok(serde_json::to_value(result)?);
        }

        let handler = self
            .inner
            .registry
            .request_handler(&request.method)
            .ok_or_else(|| AppError::Rpc(ErrorObject::method_not_found(&request.method)))?;

        let meta = request
            .params
            .as_ref()
            .and_then(|params| params.get("_meta"))
            .cloned();
        let ctx = RequestContext::new(
            request.id,
            request.method,
            meta,
            self.session_id(),
            self.clone(),
        );
        let params = request.params;

        let call = std::panic::catch_unwind(AssertUnwindSafe(|| handler(params, ctx)))
            .map_err(|panic| AppError::Handler(panic_message(&*panic)))?;
        AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AppError::Handler(panic_message(&*panic))))
    }

    // ── Notifications ───────────────────────────────────────────────────────

    async fn handle_notification(&self, notification: Notification) {
        let method = notification.method;
        match method.as_str() {
            methods::NOTIFICATIONS_PROGRESS => self.route_progress(notification.params.as_ref()),
            methods::NOTIFICATIONS_INITIALIZED
                if self.inner.negotiator.role() == Role::Server =>
            {
                self.inner.negotiator.mark_peer_initialized();
            }
            methods::NOTIFICATIONS_CANCELLED => {
                debug!(params = ?notification.params, "peer cancelled a request");
            }
            _ => {}
        }
        self.run_notification_handlers(method, notification.params)
            .await;
    }

    async fn run_notification_handlers(&self, method: String, params: Option<Value>) {
        if let Err(err) = self.inner.negotiator.gate_inbound_notification(&method) {
            debug!(%method, %err, "notification dropped");
            return;
        }

        for handler in self.inner.registry.notification_handlers(&method) {
            let ctx = NotificationContext::new(method.clone(), self.session_id(), self.clone());
            let params = params.clone();
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params, ctx)))
            {
                Ok(call) => AssertUnwindSafe(call)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(AppError::Handler(panic_message(&*panic)))),
                Err(panic) => Err(AppError::Handler(panic_message(&*panic))),
            };
            if let Err(err) = outcome {
                warn!(%method, %err, "notification handler failed");
                self.inner
                    .config
                    .report_exception(&err, &json!({"method": method}));
            }
        }
    }

    fn route_progress(&self, params: Option<&Value>) {
        let Some(progress) = params.and_then(|p| serde_json::from_value::<Progress>(p.clone()).ok())
        else {
            debug!("ignoring malformed progress notification");
            return;
        };
        let Some(id) = RequestId::from_value(&progress.progress_token) else {
            debug!(token = %progress.progress_token, "progress token is not a request id");
            return;
        };
        let Some(sink) = self.inner.pending.progress_sink(&id) else {
            debug!(%id, "progress for a request that is no longer pending");
            return;
        };
        if let Some(reset) = &sink.reset {
            reset.notify_one();
        }
        (sink.callback)(progress);
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Whether `value` is a response or a non-empty array of responses only.
fn is_response_only(value: &Value) -> bool {
    fn is_response(item: &Value) -> bool {
        item.as_object().is_some_and(|map| {
            !map.contains_key("method") && (map.contains_key("result") || map.contains_key("error"))
        })
    }
    match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(is_response),
        other => is_response(other),
    }
}

fn is_progress(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some(methods::NOTIFICATIONS_PROGRESS)
        && value.get("id").is_none()
}

fn is_initialized_notification(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some(methods::NOTIFICATIONS_INITIALIZED)
        && value.get("id").is_none()
}

fn encode_reply<T: Serialize>(reply: &T) -> Option<String> {
    match serde_json::to_string(reply) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(%err, "failed to encode reply");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}
