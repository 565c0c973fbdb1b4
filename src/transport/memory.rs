//! In-process connected transport pair.
//!
//! Frames sent on one half arrive on the other half's inbound stream.
//! Useful for wiring a client and server engine together in one process.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transport, INBOUND_CAPACITY};
use crate::{AppError, Result};

/// One half of an in-memory transport pair.
pub struct MemoryTransport {
    label: &'static str,
    outbound: mpsc::Sender<String>,
    inbound: Mutex<Option<mpsc::Receiver<String>>>,
    connected: AtomicBool,
    closed: CancellationToken,
    peer_closed: CancellationToken,
}

impl MemoryTransport {
    /// Build two connected halves: `(client, server)`.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (to_server, server_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (to_client, client_rx) = mpsc::channel(INBOUND_CAPACITY);
        let client_closed = CancellationToken::new();
        let server_closed = CancellationToken::new();

        let client = Self {
            label: "client",
            outbound: to_server,
            inbound: Mutex::new(Some(client_rx)),
            connected: AtomicBool::new(false),
            closed: client_closed.clone(),
            peer_closed: server_closed.clone(),
        };
        let server = Self {
            label: "server",
            outbound: to_client,
            inbound: Mutex::new(Some(server_rx)),
            connected: AtomicBool::new(false),
            closed: server_closed,
            peer_closed: client_closed,
        };
        (client, server)
    }

    /// Convenience for callers that hold transports behind `Arc`.
    #[must_use]
    pub fn arc_pair() -> (Arc<Self>, Arc<Self>) {
        let (client, server) = Self::pair();
        (Arc::new(client), Arc::new(server))
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.connected.swap(true, Ordering::SeqCst) {
                return Err(AppError::Transport("already connected".into()));
            }
            // Either side closing tears down both halves.
            let closed = self.closed.clone();
            let peer_closed = self.peer_closed.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = closed.cancelled() => peer_closed.cancel(),
                    () = peer_closed.cancelled() => closed.cancel(),
                }
            });
            Ok(())
        })
    }

    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(AppError::Transport("transport closed".into()));
            }
            self.outbound
                .send(frame)
                .await
                .map_err(|_| AppError::Transport("peer dropped its inbound stream".into()))
        })
    }

    fn receive(&self) -> Result<mpsc::Receiver<String>> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::Transport("inbound stream already taken".into()))
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if !self.closed.is_cancelled() {
                debug!(side = self.label, "memory transport: disconnecting");
                self.closed.cancel();
            }
        })
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}
