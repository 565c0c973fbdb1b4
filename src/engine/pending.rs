//! Pending outbound requests and their deadlines.
//!
//! Every outbound request is inserted into the [`PendingTable`] before its
//! frame is written. Removal from the table is the single point that decides
//! who settles a request: the response path, a timer, a send failure, or
//! connection close. Whoever removes the entry owns the outcome; everyone
//! else observes the entry missing and backs off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::time::{self, Instant};
use tracing::debug;

use super::options::ProgressCallback;
use crate::protocol::message::RequestId;
use crate::{AppError, Result};

/// Where progress for one pending request goes.
#[derive(Clone)]
pub struct ProgressSink {
    /// User callback.
    pub callback: ProgressCallback,
    /// Signalled on each progress update when the resettable timeout should restart.
    pub reset: Option<Arc<Notify>>,
}

struct PendingEntry {
    completion: oneshot::Sender<Result<Value>>,
    progress: Option<ProgressSink>,
}

/// Table of in-flight outbound requests keyed by id.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiving half of its completion.
    pub fn insert(
        &self,
        id: RequestId,
        progress: Option<ProgressSink>,
    ) -> oneshot::Receiver<Result<Value>> {
        let (completion, rx) = oneshot::channel();
        self.lock().insert(
            id,
            PendingEntry {
                completion,
                progress,
            },
        );
        rx
    }

    /// Settle `id` with `outcome`. Returns `false` when no entry existed
    /// (already timed out, closed, or a duplicate response).
    pub fn resolve(&self, id: &RequestId, outcome: Result<Value>) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                // The waiter may have been dropped; nothing to deliver then.
                let _ = entry.completion.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove `id` without settling it. Returns `true` when this call removed it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// The progress sink registered for `id`, if the request is still pending.
    #[must_use]
    pub fn progress_sink(&self, id: &RequestId) -> Option<ProgressSink> {
        self.lock().get(id).and_then(|entry| entry.progress.clone())
    }

    /// Drain the table, rejecting every entry with `err`. Returns how many
    /// entries were rejected.
    pub fn reject_all(&self, err: &AppError) -> usize {
        let drained: Vec<PendingEntry> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.completion.send(Err(err.clone()));
        }
        count
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no request is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Waiter ────────────────────────────────────────────────────────────────────

enum Fired {
    Settled(std::result::Result<Result<Value>, oneshot::error::RecvError>),
    MaxTotal,
    Timeout,
}

/// Awaits one pending request under its two deadlines.
///
/// The resettable timeout restarts each time `reset` is notified. The total
/// timeout never moves and wins a tie. Dropping a `Waiter` before it settles
/// removes the entry, so a late response is discarded.
pub struct Waiter {
    table: Arc<PendingTable>,
    id: RequestId,
    rx: oneshot::Receiver<Result<Value>>,
    timeout: Duration,
    max_total: Option<Duration>,
    reset: Option<Arc<Notify>>,
    started: Instant,
    settled: bool,
}

impl Waiter {
    /// Build a waiter for an entry already inserted into `table`. Both
    /// deadlines count from this call.
    #[must_use]
    pub fn new(
        table: Arc<PendingTable>,
        id: RequestId,
        rx: oneshot::Receiver<Result<Value>>,
        timeout: Duration,
        max_total: Option<Duration>,
        reset: Option<Arc<Notify>>,
    ) -> Self {
        Self {
            table,
            id,
            rx,
            timeout,
            max_total,
            reset,
            started: Instant::now(),
            settled: false,
        }
    }

    /// Id of the awaited request.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the response or a deadline.
    ///
    /// # Errors
    ///
    /// Returns the peer's error as [`AppError::Rpc`], [`AppError::Timeout`],
    /// [`AppError::MaxTotalTimeout`], or [`AppError::ConnectionClosed`].
    pub async fn wait(mut self) -> Result<Value> {
        let timeout = self.timeout;
        let hard_deadline = self.max_total.map(|limit| self.started + limit);
        let mut soft_deadline = self.started + timeout;
        let reset = self.reset.clone();

        let fired = loop {
            tokio::select! {
                biased;

                outcome = &mut self.rx => break Fired::Settled(outcome),

                () = sleep_until_or_never(hard_deadline) => break Fired::MaxTotal,

                () = time::sleep_until(soft_deadline) => break Fired::Timeout,

                () = notified_or_never(reset.as_deref()) => {
                    soft_deadline = Instant::now() + timeout;
                }
            }
        };

        match fired {
            Fired::Settled(outcome) => {
                self.settled = true;
                outcome.unwrap_or(Err(AppError::ConnectionClosed))
            }
            Fired::MaxTotal => {
                let limit = self.max_total.unwrap_or_default();
                self.expire(AppError::MaxTotalTimeout(format!("{}ms", limit.as_millis())))
                    .await
            }
            Fired::Timeout => {
                self.expire(AppError::Timeout(format!("{}ms", timeout.as_millis())))
                    .await
            }
        }
    }

    async fn expire(&mut self, err: AppError) -> Result<Value> {
        self.settled = true;
        if self.table.remove(&self.id) {
            debug!(id = %self.id, %err, "pending request expired");
            return Err(err);
        }
        // A response won the race and is already in the channel.
        (&mut self.rx).await.unwrap_or(Err(AppError::ConnectionClosed))
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.table.remove(&self.id);
        }
    }
}

async fn sleep_until_or_never(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn notified_or_never(notify: Option<&Notify>) {
    match notify {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
