//! Session process handle — owns the child process and its transport tasks.
//!
//! The reader and writer run as separate tasks that only emit signals into
//! the supervisor's channel; they never touch session state themselves.
//! All outgoing frames funnel through the single writer task so partial
//! writes cannot interleave.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_types::{ClientError, ProfileKind, SessionConfig};

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol;
use crate::router::Router;

/// Bounded queue decoupling concurrent senders from the single writer.
pub(crate) const WRITER_CHANNEL_CAPACITY: usize = 64;

/// A desynchronized stream never recovers; after this many consecutive
/// read failures the transport is reported closed.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// Signal from a session's transport tasks to the supervisor.
#[derive(Debug)]
pub(crate) struct SessionSignal {
    /// Spawn generation this signal belongs to. The supervisor ignores
    /// signals from a process it has already replaced.
    pub epoch: u64,
    pub kind: SignalKind,
}

#[derive(Debug)]
pub(crate) enum SignalKind {
    /// A notification delivered to a router subscriber.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// The stream ended. `cause` is attached when closure was inferred
    /// from an unrecoverable stream failure rather than a clean EOF.
    Closed { cause: Option<String> },
    /// A read or write failed mid-stream.
    IoError { detail: String },
}

/// Spawn the reader and writer tasks over an arbitrary byte stream pair.
///
/// Generic over the stream halves so tests can wire an in-memory duplex
/// where production wires child stdio.
pub(crate) fn spawn_io_tasks<R, W>(
    stdout: R,
    stdin: W,
    router: Arc<Router>,
    mut outbound_rx: mpsc::Receiver<serde_json::Value>,
    signal_tx: mpsc::Sender<SessionSignal>,
    epoch: u64,
) -> (JoinHandle<()>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let writer_signal_tx = signal_tx.clone();
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(stdin);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!(error = %e, "transport write error");
                let _ = writer_signal_tx
                    .send(SessionSignal {
                        epoch,
                        kind: SignalKind::IoError {
                            detail: e.to_string(),
                        },
                    })
                    .await;
                break;
            }
        }
    });

    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(stdout);
        let mut consecutive_errors = 0u32;
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    router.dispatch(&frame).await;
                }
                Ok(None) => {
                    tracing::info!("analysis process closed its stream");
                    let _ = signal_tx
                        .send(SessionSignal {
                            epoch,
                            kind: SignalKind::Closed { cause: None },
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport read error");
                    let fatal = e.is_fatal();
                    let detail = e.to_string();
                    let _ = signal_tx
                        .send(SessionSignal {
                            epoch,
                            kind: SignalKind::IoError {
                                detail: detail.clone(),
                            },
                        })
                        .await;
                    consecutive_errors += 1;
                    if fatal || consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        let _ = signal_tx
                            .send(SessionSignal {
                                epoch,
                                kind: SignalKind::Closed {
                                    cause: Some(detail),
                                },
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    });

    (reader_handle, writer_handle)
}

/// Forward the process's stderr lines to the log sink. The stream carries
/// human-readable server traces, not protocol frames.
fn spawn_stderr_task<R>(stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "server_stderr", "{line}");
        }
    })
}

/// First-sight documents get version 1 (didOpen); later edits bump the
/// per-document counter (didChange).
fn next_document_version(opened: &mut HashMap<String, i32>, uri: &str) -> (bool, i32) {
    match opened.get_mut(uri) {
        Some(version) => {
            *version += 1;
            (false, *version)
        }
        None => {
            opened.insert(uri.to_string(), 1);
            (true, 1)
        }
    }
}

/// One live process plus its wired transport.
pub(crate) struct RunningSession {
    child: Child,
    router: Arc<Router>,
    /// URI → current synchronized version.
    opened_docs: HashMap<String, i32>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl RunningSession {
    /// Resolve, launch, and wire the analysis process. The initialize
    /// handshake is the caller's next step, not part of the spawn.
    pub async fn spawn(
        config: &SessionConfig,
        kind: ProfileKind,
        epoch: u64,
        signal_tx: mpsc::Sender<SessionSignal>,
        next_id: Arc<AtomicU64>,
    ) -> Result<Self> {
        let profile = config.profile(kind);
        let resolved = which::which(&profile.command)
            .with_context(|| format!("{} not found in PATH", profile.command))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(&profile.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &profile.env {
            cmd.env(key, value);
        }

        tracing::info!(
            command = %resolved.display(),
            args = ?profile.args,
            env = ?profile.env,
            profile = ?kind,
            "launching analysis process"
        );

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", profile.command))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;
        let stderr = child.stderr.take().context("no stderr from child")?;

        let (outbound_tx, outbound_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let mut router = Router::new(epoch, next_id, outbound_tx);
        router.subscribe("textDocument/publishDiagnostics", signal_tx.clone());
        let router = Arc::new(router);

        let (reader_handle, writer_handle) =
            spawn_io_tasks(stdout, stdin, router.clone(), outbound_rx, signal_tx, epoch);
        let stderr_handle = spawn_stderr_task(stderr);

        Ok(Self {
            child,
            router,
            opened_docs: HashMap::new(),
            reader_handle,
            writer_handle,
            stderr_handle,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Synchronize a document edit: didOpen on first sight, didChange
    /// with a bumped version afterwards.
    pub async fn document_changed(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
    ) -> Result<(), ClientError> {
        let (first_time, version) = next_document_version(&mut self.opened_docs, uri);
        if first_time {
            let params = protocol::did_open_params(uri, language_id, version, text);
            self.router
                .notify("textDocument/didOpen", Some(params))
                .await
        } else {
            let params = protocol::did_change_params(uri, version, text);
            self.router
                .notify("textDocument/didChange", Some(params))
                .await
        }
    }

    /// Graceful teardown: shutdown request, exit notification, bounded
    /// grace wait, then force kill. Consumes self.
    pub async fn shutdown(mut self, grace: Duration) {
        if self.router.request("shutdown", None, grace).await.is_ok() {
            let _ = self.router.notify("exit", None).await;
        }
        self.router.close().await;

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        if waited.is_err() {
            tracing::debug!("analysis process did not exit in time, killing");
            let _ = self.child.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
    }

    /// Drop the session without ceremony — used when replacing a dead
    /// process or discarding one after a fatal failure.
    pub async fn abandon(mut self) {
        self.router.close().await;
        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::io::AsyncWriteExt;

    fn wired_router(
        epoch: u64,
        signal_tx: &mpsc::Sender<SessionSignal>,
    ) -> (Arc<Router>, mpsc::Receiver<serde_json::Value>) {
        let (out_tx, out_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let mut router = Router::new(epoch, Arc::new(AtomicU64::new(1)), out_tx);
        router.subscribe("textDocument/publishDiagnostics", signal_tx.clone());
        (Arc::new(router), out_rx)
    }

    #[tokio::test]
    async fn test_request_cycle_over_in_memory_transport() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        let (signal_tx, _signal_rx) = mpsc::channel(16);
        let (router, out_rx) = wired_router(1, &signal_tx);
        spawn_io_tasks(client_read, client_write, router.clone(), out_rx, signal_tx, 1);

        // Fake server: answer the one request it receives.
        tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            let mut writer = FrameWriter::new(server_write);
            let frame = reader.read_frame().await.unwrap().unwrap();
            assert_eq!(frame["method"], "ping");
            let id = frame["id"].as_u64().unwrap();
            writer
                .write_frame(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "pong": true }
                }))
                .await
                .unwrap();
        });

        let result = router
            .request("ping", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result["pong"], true);
    }

    #[tokio::test]
    async fn test_clean_eof_signals_closed() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);

        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let (router, out_rx) = wired_router(2, &signal_tx);
        spawn_io_tasks(client_read, client_write, router, out_rx, signal_tx, 2);

        drop(server_io);

        let signal = signal_rx.recv().await.unwrap();
        assert_eq!(signal.epoch, 2);
        assert!(matches!(signal.kind, SignalKind::Closed { cause: None }));
    }

    #[tokio::test]
    async fn test_reader_survives_bad_body_and_delivers_next_frame() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, mut server_write) = tokio::io::split(server_io);

        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let (router, out_rx) = wired_router(1, &signal_tx);
        spawn_io_tasks(client_read, client_write, router.clone(), out_rx, signal_tx, 1);

        tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            let frame = reader.read_frame().await.unwrap().unwrap();
            let id = frame["id"].as_u64().unwrap();

            // A correctly framed but non-JSON body, then the real response.
            server_write
                .write_all(b"Content-Length: 3\r\n\r\nxyz")
                .await
                .unwrap();
            let response = serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}});
            let body = serde_json::to_string(&response).unwrap();
            server_write
                .write_all(format!("Content-Length: {}\r\n\r\n{body}", body.len()).as_bytes())
                .await
                .unwrap();
        });

        let result = router.request("ping", None, Duration::from_secs(5)).await;
        assert!(result.is_ok(), "response after a bad frame still arrives");

        let signal = signal_rx.recv().await.unwrap();
        assert!(matches!(signal.kind, SignalKind::IoError { .. }));
    }

    #[tokio::test]
    async fn test_writer_failure_signals_io_error() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);

        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let (router, out_rx) = wired_router(1, &signal_tx);
        spawn_io_tasks(client_read, client_write, router.clone(), out_rx, signal_tx, 1);

        drop(server_io);

        // Dropping the peer makes the next write fail.
        let _ = router.notify("textDocument/didOpen", None).await;

        let mut saw_io_error = false;
        while let Some(signal) = signal_rx.recv().await {
            if matches!(signal.kind, SignalKind::IoError { .. }) {
                saw_io_error = true;
                break;
            }
        }
        assert!(saw_io_error);
    }

    #[test]
    fn test_document_versions_are_monotonic() {
        let mut opened = HashMap::new();
        assert_eq!(next_document_version(&mut opened, "file:///a.html"), (true, 1));
        assert_eq!(next_document_version(&mut opened, "file:///a.html"), (false, 2));
        assert_eq!(next_document_version(&mut opened, "file:///a.html"), (false, 3));
        assert_eq!(next_document_version(&mut opened, "file:///b.css"), (true, 1));
    }
}
