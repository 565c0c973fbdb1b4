//! Stdio transport: newline-delimited JSON over a pair of byte streams.
//!
//! Three ways to build one:
//!
//! - [`StdioTransport::stdio`] serves on this process's own stdin/stdout.
//! - [`StdioTransport::new`] wraps arbitrary async pipes (tests use
//!   [`tokio::io::duplex`]).
//! - [`StdioTransport::spawn`] launches a server subprocess and talks to it
//!   over its piped stdin/stdout.
//!
//! A reader task drives [`FramedRead`] with [`LineCodec`] and pushes each
//! complete line onto the inbound channel. A writer task owns the output
//! stream; [`Transport::send`] enqueues a frame and waits for the writer's
//! acknowledgement, so concurrent senders never interleave and a full queue
//! applies backpressure.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::LineCodec;
use super::{Transport, INBOUND_CAPACITY, WOULD_BLOCK_RETRY};
use crate::{AppError, Result};

/// Frames queued for the writer before `send` starts waiting.
const OUTBOUND_CAPACITY: usize = 64;

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables a spawned server inherits by default.
///
/// Every other variable is stripped via `env_clear()` before launch, so
/// credentials held by the host never leak into the child.
#[cfg(not(windows))]
pub const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Environment variables a spawned server inherits by default.
#[cfg(windows)]
pub const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// The inherited subset of this process's environment.
///
/// Values starting with `()` are skipped; those are exported shell
/// functions, not plain variables.
#[must_use]
pub fn default_environment() -> Vec<(String, String)> {
    INHERITED_ENV_VARS
        .iter()
        .filter_map(|&key| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.starts_with("()"))
                .map(|value| (key.to_owned(), value))
        })
        .collect()
}

// ── Configuration ────────────────────────────────────────────────────────────

/// How to launch a server subprocess.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment layered over [`default_environment`].
    pub env: Vec<(String, String)>,
    /// Working directory; inherits ours when `None`.
    pub cwd: Option<PathBuf>,
    /// How long to wait after closing stdin (and again after `SIGTERM`)
    /// before escalating.
    pub shutdown_grace: Duration,
}

impl SpawnConfig {
    /// Launch `program` with `args` and the default environment.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            cwd: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum Source {
    Pipes(BoxedReader, BoxedWriter),
    Spawn(SpawnConfig),
}

struct OutboundFrame {
    line: String,
    ack: oneshot::Sender<Result<()>>,
}

/// Newline-delimited JSON transport over byte streams.
pub struct StdioTransport {
    source: Mutex<Option<Source>>,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    inbound: Mutex<Option<mpsc::Receiver<String>>>,
    child: Mutex<Option<(Child, Duration)>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl StdioTransport {
    fn from_source(source: Source) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            outbound: Mutex::new(None),
            inbound: Mutex::new(None),
            child: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Wrap an arbitrary reader/writer pair.
    #[must_use]
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_source(Source::Pipes(Box::new(reader), Box::new(writer)))
    }

    /// Serve on this process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Launch a server subprocess on [`connect`](Transport::connect).
    #[must_use]
    pub fn spawn(config: SpawnConfig) -> Self {
        Self::from_source(Source::Spawn(config))
    }

    fn spawn_child(config: &SpawnConfig) -> Result<(Child, BoxedReader, BoxedWriter)> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);

        // Strip inherited environment, then inject only the allowlist.
        cmd.env_clear();
        cmd.envs(default_environment());
        cmd.envs(config.env.iter().cloned());

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Transport(format!("failed to spawn {}: {err}", config.program))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture child stdout".into()))?;

        info!(program = %config.program, pid = child.id(), "spawned stdio server");
        Ok((child, Box::new(stdout), Box::new(stdin)))
    }
}

impl Transport for StdioTransport {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.connected.swap(true, Ordering::SeqCst) {
                return Err(AppError::Transport("already connected".into()));
            }

            let source = self
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| AppError::Transport("stdio source already consumed".into()))?;

            let (reader, writer) = match source {
                Source::Pipes(reader, writer) => (reader, writer),
                Source::Spawn(config) => {
                    let (child, reader, writer) = Self::spawn_child(&config)?;
                    *self.child.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some((child, config.shutdown_grace));
                    (reader, writer)
                }
            };

            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
            *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbound_rx);
            *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound_tx);

            tokio::spawn(
                run_reader(reader, inbound_tx, self.closed.clone())
                    .instrument(info_span!("stdio_reader")),
            );
            tokio::spawn(
                run_writer(writer, outbound_rx, self.closed.clone())
                    .instrument(info_span!("stdio_writer")),
            );
            Ok(())
        })
    }

    fn send(&self, frame: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if frame.contains('\n') {
                return Err(AppError::Transport("frame contains a raw newline".into()));
            }
            if self.closed.is_cancelled() {
                return Err(AppError::Transport("transport closed".into()));
            }
            let sender = self
                .outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(|| AppError::Transport("not connected".into()))?;

            let (ack, acked) = oneshot::channel();
            sender
                .send(OutboundFrame { line: frame, ack })
                .await
                .map_err(|_| AppError::Transport("writer stopped".into()))?;
            acked
                .await
                .map_err(|_| AppError::Transport("writer stopped before the frame was written".into()))?
        })
    }

    fn receive(&self) -> Result<mpsc::Receiver<String>> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::Transport("inbound stream unavailable".into()))
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.cancel();
            // Drop the queue so the writer releases the child's stdin.
            self.outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let child = self.child.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some((child, grace)) = child {
                terminate_child(child, grace).await;
            }
        })
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// Read NDJSON frames until EOF, a fatal error, or cancellation.
///
/// "Would block" errors are retried after [`WOULD_BLOCK_RETRY`].
async fn run_reader(reader: BoxedReader, inbound: mpsc::Sender<String>, closed: CancellationToken) {
    let mut framed = FramedRead::new(reader, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => {
                debug!("stdio reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => match item {
                Some(Ok(line)) => {
                    if inbound.send(line).await.is_err() {
                        debug!("stdio reader: inbound receiver dropped, stopping");
                        break;
                    }
                }
                Some(Err(err)) if err.is_transient() => {
                    // FramedRead terminates after an error; rebuild it and
                    // carry over any partial line already buffered.
                    let buffered = framed.read_buffer().clone();
                    tokio::time::sleep(WOULD_BLOCK_RETRY).await;
                    framed = FramedRead::new(framed.into_inner(), LineCodec::new());
                    framed.read_buffer_mut().extend_from_slice(&buffered);
                }
                Some(Err(err)) => {
                    warn!(%err, "stdio reader: read failed, closing");
                    break;
                }
                None => {
                    debug!("stdio reader: end of stream");
                    break;
                }
            }
        }
    }

    closed.cancel();
}

/// Write queued frames, acknowledging each one to its sender.
async fn run_writer(
    mut writer: BoxedWriter,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    closed: CancellationToken,
) {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => {
                debug!("stdio writer: cancellation received, stopping");
                break;
            }

            next = outbound.recv() => {
                let Some(OutboundFrame { line, ack }) = next else {
                    debug!("stdio writer: queue closed, stopping");
                    break;
                };

                buf.clear();
                let result = match codec.encode(line, &mut buf) {
                    Ok(()) => write_frame(&mut writer, &buf).await,
                    Err(err) => Err(err),
                };
                let fatal = matches!(result, Err(AppError::Io(_)));
                let _ = ack.send(result);
                if fatal {
                    warn!("stdio writer: write failed, closing");
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    closed.cancel();
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Close stdin (already done by the caller), then escalate to `SIGTERM` and
/// finally `SIGKILL` if the child keeps running.
async fn terminate_child(mut child: Child, grace: Duration) {
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        debug!(?status, "stdio server exited after stdin closed");
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(%err, pid, "failed to send SIGTERM to stdio server");
            } else if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                debug!(?status, "stdio server exited after SIGTERM");
                return;
            }
        }
    }

    if let Err(err) = child.kill().await {
        warn!(%err, "failed to kill stdio server");
    }
}
