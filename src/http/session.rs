//! Server side of streamable HTTP: sessions and their SSE streams.
//!
//! Each session owns one protocol [`Engine`] whose transport is a
//! [`SessionTransport`]: anything the engine writes lands on the session's
//! SSE stream. Inbound traffic arrives by `POST` and is fed to the engine
//! through [`Engine::handle_frame`].
//!
//! The session table sits behind one `std::sync::Mutex`. The lock is held
//! for a map access or a single non-blocking channel send, never across an
//! `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::engine::Engine;
use crate::protocol::message::{Frame, Message, Notification};
use crate::transport::Transport;
use crate::{AppError, Result};

/// Default interval between SSE keepalive comments.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Builds the engine for a new session around its transport.
pub type EngineFactory = Arc<dyn Fn(Arc<dyn Transport>) -> Result<Engine> + Send + Sync>;

/// One item written to an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `data: <payload>` event.
    Data(String),
    /// `: <text>` comment (keepalive).
    Comment(String),
}

/// Outcome of [`SessionManager::send_notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Targeted send; `true` when the session's stream accepted it.
    Targeted(bool),
    /// Broadcast; number of streams that accepted it.
    Broadcast(usize),
}

/// How the `POST` reply should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostReply {
    /// Nothing to answer (notifications or responses only).
    NoContent,
    /// Reply written to the session's SSE stream.
    Streamed,
    /// Reply to be returned as the `POST` body.
    Direct(String),
}

/// Outcome of an `initialize` POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// The handshake succeeded and the session is registered.
    Created {
        /// Value for the `Mcp-Session-Id` header.
        session_id: String,
        /// The `initialize` result frame.
        reply: String,
    },
    /// The handshake failed; no session was kept. `reply` is the error
    /// frame, or `None` when `initialize` arrived without an id.
    Rejected {
        /// Error frame to return as the `POST` body.
        reply: Option<String>,
    },
}

struct SseStream {
    generation: u64,
    tx: mpsc::UnboundedSender<SseFrame>,
    keepalive: CancellationToken,
}

struct SessionEntry {
    engine: Engine,
    stream: Option<SseStream>,
    created_at: DateTime<Utc>,
}

enum Write {
    Sent,
    NoSession,
    NoStream,
    Failed,
}

/// Table of live streamable HTTP sessions.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    factory: EngineFactory,
    keepalive: Duration,
    next_generation: AtomicU64,
    this: Weak<SessionManager>,
}

impl SessionManager {
    /// Build a manager whose sessions get engines from `factory`.
    #[must_use]
    pub fn new(factory: EngineFactory, keepalive: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions: Mutex::new(HashMap::new()),
            factory,
            keepalive,
            next_generation: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Session lifecycle ───────────────────────────────────────────────────

    /// Create a session and feed it the `initialize` frame. The session is
    /// kept only when the engine answers with a result.
    ///
    /// # Errors
    ///
    /// Returns the factory's error when the engine cannot be built.
    pub async fn initialize_session(&self, raw: &str) -> Result<SessionStart> {
        let session_id = Uuid::new_v4().to_string();
        let transport: Arc<dyn Transport> = Arc::new(SessionTransport {
            session_id: session_id.clone(),
            manager: self.this.clone(),
            closed: CancellationToken::new(),
        });
        let engine = (self.factory)(transport)?;

        self.lock().insert(
            session_id.clone(),
            SessionEntry {
                engine: engine.clone(),
                stream: None,
                created_at: Utc::now(),
            },
        );
        info!(session_id = %session_id, "session created");

        let reply = engine
            .handle_frame(raw)
            .instrument(info_span!("session_initialize", session_id = %session_id))
            .await;

        match reply {
            Some(reply) if is_result(&reply) => Ok(SessionStart::Created { session_id, reply }),
            reply => {
                warn!(session_id = %session_id, "initialize failed; dropping session");
                self.remove_session(&session_id).await;
                Ok(SessionStart::Rejected { reply })
            }
        }
    }

    /// Feed a `POST` body to an existing session's engine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] for an unknown session id.
    pub async fn handle_post(&self, session_id: &str, raw: &str) -> Result<PostReply> {
        let engine = self
            .engine(session_id)
            .ok_or_else(|| AppError::Session(format!("unknown session {session_id}")))?;

        let Some(reply) = engine.handle_frame(raw).await else {
            return Ok(PostReply::NoContent);
        };

        match self.write(session_id, SseFrame::Data(reply.clone())) {
            Write::Sent => Ok(PostReply::Streamed),
            Write::NoSession | Write::NoStream => Ok(PostReply::Direct(reply)),
            Write::Failed => {
                warn!(session_id, "event stream write failed; answering the POST directly");
                self.discard(session_id);
                Ok(PostReply::Direct(reply))
            }
        }
    }

    /// Attach a new SSE stream to `session_id`, replacing any previous one,
    /// and start its keepalive task.
    ///
    /// Returns `None` for an unknown session.
    pub fn attach_stream(&self, session_id: &str) -> Option<mpsc::UnboundedReceiver<SseFrame>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let keepalive = CancellationToken::new();

        {
            let mut sessions = self.lock();
            let entry = sessions.get_mut(session_id)?;
            let previous = entry.stream.replace(SseStream {
                generation,
                tx,
                keepalive: keepalive.clone(),
            });
            if let Some(previous) = previous {
                previous.keepalive.cancel();
                debug!(session_id, "event stream replaced");
            }
        }

        tokio::spawn(
            run_keepalive(
                self.this.clone(),
                session_id.to_owned(),
                generation,
                keepalive,
                self.keepalive,
            )
            .instrument(info_span!("sse_keepalive", session_id = %session_id)),
        );
        info!(session_id, "event stream attached");
        Some(rx)
    }

    /// Remove `session_id`, close its stream, and close its engine.
    /// Returns `false` when the session did not exist.
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let Some(entry) = self.take(session_id) else {
            return false;
        };
        entry.engine.close().await;
        true
    }

    fn take(&self, session_id: &str) -> Option<SessionEntry> {
        let entry = self.lock().remove(session_id)?;
        if let Some(stream) = &entry.stream {
            stream.keepalive.cancel();
        }
        info!(
            session_id,
            age_secs = (Utc::now() - entry.created_at).num_seconds(),
            "session removed"
        );
        Some(entry)
    }

    /// Remove a session from a synchronous path; its engine closes in the background.
    fn discard(&self, session_id: &str) {
        if let Some(entry) = self.take(session_id) {
            tokio::spawn(async move { entry.engine.close().await });
        }
    }

    /// Tear every session down.
    pub async fn close(&self) {
        let drained: Vec<(String, SessionEntry)> = self.lock().drain().collect();
        let count = drained.len();
        let engines: Vec<Engine> = drained
            .into_iter()
            .map(|(_, entry)| {
                if let Some(stream) = &entry.stream {
                    stream.keepalive.cancel();
                }
                entry.engine
            })
            .collect();
        join_all(engines.iter().map(|engine| engine.close())).await;
        info!(count, "all sessions closed");
    }

    // ── Delivery ────────────────────────────────────────────────────────────

    fn write(&self, session_id: &str, frame: SseFrame) -> Write {
        let sessions = self.lock();
        let Some(entry) = sessions.get(session_id) else {
            return Write::NoSession;
        };
        let Some(stream) = &entry.stream else {
            return Write::NoStream;
        };
        if stream.tx.send(frame).is_ok() {
            Write::Sent
        } else {
            Write::Failed
        }
    }

    /// Write `payload` as a `data` event to one session's stream.
    ///
    /// Returns `false` when the session or its stream is absent, or the
    /// write failed (the session is then cleaned up).
    pub fn send_to_session(&self, session_id: &str, payload: &str) -> bool {
        match self.write(session_id, SseFrame::Data(payload.to_owned())) {
            Write::Sent => true,
            Write::NoSession | Write::NoStream => false,
            Write::Failed => {
                self.discard(session_id);
                false
            }
        }
    }

    /// Write `payload` to every session with an open stream. Sessions whose
    /// stream fails are pruned. Returns the number of successful deliveries.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let sessions = self.lock();
            for (session_id, entry) in sessions.iter() {
                let Some(stream) = &entry.stream else {
                    continue;
                };
                if stream.tx.send(SseFrame::Data(payload.to_owned())).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(session_id.clone());
                }
            }
        }
        for session_id in failed {
            warn!(session_id = %session_id, "pruning session with a dead event stream");
            self.discard(&session_id);
        }
        delivered
    }

    /// Deliver `payload` to `target`, or to every session when `target` is `None`.
    pub fn send_notification(&self, payload: &str, target: Option<&str>) -> Delivery {
        match target {
            Some(session_id) => Delivery::Targeted(self.send_to_session(session_id, payload)),
            None => Delivery::Broadcast(self.broadcast(payload)),
        }
    }

    /// Encode a notification and deliver it like [`send_notification`](Self::send_notification).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Parse`] if the notification cannot be encoded.
    pub fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        target: Option<&str>,
    ) -> Result<Delivery> {
        let frame =
            Frame::Single(Message::Notification(Notification::new(method, params))).encode()?;
        Ok(self.send_notification(&frame, target))
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Engine serving `session_id`.
    #[must_use]
    pub fn engine(&self, session_id: &str) -> Option<Engine> {
        self.lock().get(session_id).map(|entry| entry.engine.clone())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `session_id` currently has an SSE stream attached.
    #[must_use]
    pub fn has_stream(&self, session_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|entry| entry.stream.is_some())
    }

    fn write_keepalive(&self, session_id: &str, generation: u64) -> Keepalive {
        let sessions = self.lock();
        let Some(stream) = sessions
            .get(session_id)
            .and_then(|entry| entry.stream.as_ref())
        else {
            return Keepalive::Gone;
        };
        if stream.generation != generation {
            return Keepalive::Gone;
        }
        let comment = format!("ping {}", Utc::now().to_rfc3339());
        if stream.tx.send(SseFrame::Comment(comment)).is_ok() {
            Keepalive::Sent
        } else {
            Keepalive::Failed
        }
    }
}

enum Keepalive {
    Sent,
    Gone,
    Failed,
}

/// Whether `frame` is a single successful response.
fn is_result(frame: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(frame)
        .is_ok_and(|value| value.get("result").is_some())
}

async fn run_keepalive(
    manager: Weak<SessionManager>,
    session_id: String,
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            _ = ticker.tick() => {}
        }

        let Some(manager) = manager.upgrade() else {
            return;
        };
        match manager.write_keepalive(&session_id, generation) {
            Keepalive::Sent => {}
            Keepalive::Gone => return,
            Keepalive::Failed => {
                debug!("keepalive write failed; client went away");
                manager.remove_session(&session_id).await;
                return;
            }
        }
    }
}

// ── Session transport ─────────────────────────────────────────────────────────

/// Transport for one session's engine. Writes go to the session's SSE
/// stream; there is no inbound stream because `POST` bodies are pushed
/// through [`Engine::handle_frame`].
pub struct SessionTransport {
    session_id: String,
    manager: Weak<SessionManager>,
    closed: CancellationToken,
}

impl Transport for SessionTransport {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(AppError::Transport("session closed".into()));
            }
            let manager = self
                .manager
                .upgrade()
                .ok_or_else(|| AppError::Transport("session manager dropped".into()))?;
            match manager.write(&self.session_id, SseFrame::Data(frame)) {
                Write::Sent => Ok(()),
                Write::NoSession => Err(AppError::Session("session no longer exists".into())),
                Write::NoStream => Err(AppError::Session("no event stream attached".into())),
                Write::Failed => {
                    manager.discard(&self.session_id);
                    Err(AppError::Transport("event stream closed".into()))
                }
            }
        })
    }

    fn receive(&self) -> Result<mpsc::Receiver<String>> {
        Err(AppError::Transport(
            "session transport is push-driven; POST bodies go through handle_frame".into(),
        ))
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move { self.closed.cancel() })
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }
}
