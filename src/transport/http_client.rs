//! Client side of the streamable HTTP transport.
//!
//! Every outbound frame is a `POST` to the endpoint. The reply depends on the
//! response:
//!
//! | Response                     | Handling                                   |
//! |------------------------------|--------------------------------------------|
//! | `202 Accepted`               | nothing to read                            |
//! | `application/json`           | body is one inbound frame                  |
//! | `text/event-stream`          | each SSE `data` payload is an inbound frame|
//! | `404` while holding a session| session expired; the id is forgotten       |
//!
//! The `Mcp-Session-Id` header is captured from any response and echoed on
//! every later request. [`StreamableHttpClientTransport::open_event_stream`]
//! opens the standalone `GET` stream for server-initiated messages.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sse::SseDecoder;
use super::{Transport, INBOUND_CAPACITY};
use crate::{AppError, Result};

/// Header carrying the session identifier in both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header announcing the negotiated protocol version after `initialize`.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Streamable HTTP client transport.
pub struct StreamableHttpClientTransport {
    http: reqwest::Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    inbound_tx: mpsc::Sender<String>,
    inbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl StreamableHttpClientTransport {
    /// Build a transport for `endpoint` with a default HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| AppError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self::with_client(http, endpoint))
    }

    /// Build a transport around an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            http,
            endpoint: endpoint.into(),
            session_id: Mutex::new(None),
            protocol_version: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            connected: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    fn current_session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(sid) = self.current_session() {
            req = req.header(SESSION_ID_HEADER, sid);
        }
        let version = self
            .protocol_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(version) = version {
            req = req.header(PROTOCOL_VERSION_HEADER, version);
        }
        req
    }

    fn capture_session(&self, resp: &reqwest::Response) {
        if let Some(sid) = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_deref() != Some(sid) {
                debug!(session_id = sid, "http client: session established");
                *slot = Some(sid.to_owned());
            }
        }
    }

    fn forget_session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Open the standalone `GET` event stream for server-initiated messages.
    ///
    /// A `405` reply means the server offers no standalone stream; that is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] without a session id, or
    /// [`AppError::Transport`] if the request fails.
    pub async fn open_event_stream(&self) -> Result<()> {
        if self.current_session().is_none() {
            return Err(AppError::Session("no session to open a stream for".into()));
        }

        let req = self
            .authorize(self.http.get(&self.endpoint))
            .header(ACCEPT, "text/event-stream");
        let resp = req
            .send()
            .await
            .map_err(|err| AppError::Transport(format!("GET failed: {err}")))?;

        match resp.status() {
            StatusCode::METHOD_NOT_ALLOWED => {
                info!("http client: server does not offer a standalone event stream");
                Ok(())
            }
            status if status.is_success() => {
                tokio::spawn(pump_events(
                    resp.bytes_stream(),
                    self.inbound_tx.clone(),
                    self.closed.clone(),
                ));
                Ok(())
            }
            status => Err(AppError::Transport(format!("GET returned {status}"))),
        }
    }

    async fn post(&self, frame: String) -> Result<()> {
        let had_session = self.current_session().is_some();
        let req = self
            .authorize(self.http.post(&self.endpoint))
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(frame);

        let resp = req
            .send()
            .await
            .map_err(|err| AppError::Transport(format!("POST failed: {err}")))?;
        self.capture_session(&resp);

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && had_session {
            self.forget_session();
            return Err(AppError::Transport("session expired".into()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Transport(format!("POST returned {status}: {body}")));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        if content_type.starts_with("text/event-stream") {
            tokio::spawn(pump_events(
                resp.bytes_stream(),
                self.inbound_tx.clone(),
                self.closed.clone(),
            ));
            return Ok(());
        }

        let body = resp
            .text()
            .await
            .map_err(|err| AppError::Transport(format!("failed to read response body: {err}")))?;
        if body.trim().is_empty() || is_acknowledgement(&body) {
            return Ok(());
        }
        self.inbound_tx
            .send(body)
            .await
            .map_err(|_| AppError::Transport("inbound stream dropped".into()))
    }
}

impl Transport for StreamableHttpClientTransport {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.connected.swap(true, Ordering::SeqCst) {
                return Err(AppError::Transport("already connected".into()));
            }
            Ok(())
        })
    }

    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(AppError::Transport("transport closed".into()));
            }
            self.post(frame).await
        })
    }

    fn receive(&self) -> Result<mpsc::Receiver<String>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::Transport("inbound stream already taken".into()))
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.cancel();
            let Some(sid) = self.forget_session() else {
                return;
            };
            let result = self
                .http
                .delete(&self.endpoint)
                .header(SESSION_ID_HEADER, &sid)
                .send()
                .await;
            match result {
                Ok(resp) => debug!(session_id = %sid, status = %resp.status(), "http client: session deleted"),
                Err(err) => warn!(session_id = %sid, %err, "http client: session delete failed"),
            }
        })
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn session_id(&self) -> Option<String> {
        self.current_session()
    }

    fn set_protocol_version(&self, version: &str) {
        *self
            .protocol_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(version.to_owned());
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Whether `body` is a transport acknowledgement such as `{"accepted":true}`
/// rather than a JSON-RPC frame.
fn is_acknowledgement(body: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(body),
        Ok(Value::Object(map)) if !map.contains_key("jsonrpc")
    )
}

/// Forward SSE `data` payloads from `stream` until it ends or the transport closes.
async fn pump_events<S>(stream: S, inbound: mpsc::Sender<String>, closed: CancellationToken)
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = SseDecoder::default();
    let mut carry: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => return,

            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    carry.extend_from_slice(&bytes);
                    let text = take_utf8(&mut carry);
                    for event in decoder.push(&text) {
                        if inbound.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "http client: event stream failed");
                    break;
                }
                None => break,
            }
        }
    }

    if let Some(event) = decoder.finish() {
        let _ = inbound.send(event).await;
    }
}

/// Decode as much of `carry` as possible. Invalid bytes become U+FFFD; only
/// an incomplete sequence at the very end is left in `carry`.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(valid) => {
                text.push_str(valid);
                carry.clear();
                return text;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match err.error_len() {
                    Some(bad) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + bad);
                    }
                    None => {
                        carry.drain(..valid);
                        return text;
                    }
                }
            }
        }
    }
}
