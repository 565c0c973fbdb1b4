//! Duplex transport abstraction.
//!
//! The [`Transport`] trait decouples the protocol engine from how frames
//! travel. A frame is one complete, self-delimited JSON text: a single
//! message or a batch array. Concrete forms:
//!
//! - [`stdio::StdioTransport`]: NDJSON over a process's standard streams,
//!   arbitrary async pipes, or a spawned child process.
//! - [`http_client::StreamableHttpClientTransport`]: client side of the
//!   streamable HTTP transport.
//! - [`memory::MemoryTransport`]: an in-process connected pair.
//!
//! The server side of streamable HTTP is driven by
//! [`crate::http::session::SessionManager`].

pub mod codec;
pub mod http_client;
pub mod memory;
pub mod sse;
pub mod stdio;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Capacity of the inbound frame channel handed out by [`Transport::receive`].
pub const INBOUND_CAPACITY: usize = 256;

/// Delay before retrying a read that reported "resource temporarily unavailable".
pub const WOULD_BLOCK_RETRY: std::time::Duration = std::time::Duration::from_millis(10);

/// A duplex channel carrying complete JSON-RPC frames.
pub trait Transport: Send + Sync {
    /// Establish readiness: start reader/writer tasks, spawn a subprocess,
    /// or open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) on a second
    /// call or when the underlying channel cannot be opened.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Write one complete frame.
    ///
    /// Concurrent callers never interleave partial frames. The returned
    /// future completes once the frame has been handed to the underlying
    /// writer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) when the
    /// transport is closed or the write fails.
    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Take the inbound frame stream. The channel closes when the transport does.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// stream was already taken or the transport is push-driven.
    fn receive(&self) -> Result<mpsc::Receiver<String>>;

    /// Close the transport. Idempotent; unblocks any in-progress read.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Token cancelled exactly once when the transport closes for any reason.
    fn closed(&self) -> CancellationToken;

    /// Streamable HTTP session id, when the transport has one.
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Record the negotiated protocol version for transports that announce
    /// it on every exchange (streamable HTTP sends it as a header).
    fn set_protocol_version(&self, _version: &str) {}
}
