//! Session supervisor — the public facade of the client bridge.
//!
//! Owns the process lifecycle end to end: spawn, handshake, steady-state
//! routing, teardown, and the restart decision when a connection is
//! severed. All state transitions run on the caller's control flow via
//! [`Supervisor::poll`]; transport tasks only feed signals into a channel.
//!
//! Construction is initialization — [`Supervisor::start`] spawns the
//! process and runs the handshake before returning.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

use tether_types::{
    ClientError, Diagnostic, DiagnosticsSnapshot, DocumentSelector, ProfileKind, SelectorError,
    SessionConfig, SessionEvent, SessionId, SessionState,
};

use crate::diagnostics::DiagnosticsSink;
use crate::machine::{Effect, Event, Machine, Policies};
use crate::negotiate::negotiate;
use crate::protocol::{self, PublishDiagnosticsParams, WireDiagnostic};
use crate::session::{RunningSession, SessionSignal, SignalKind};

/// Capacity of the channel between transport tasks and the supervisor.
const SIGNAL_CHANNEL_CAPACITY: usize = 256;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Supervises one analysis-process session.
pub struct Supervisor {
    config: SessionConfig,
    workspace_root: PathBuf,
    profile: ProfileKind,
    machine: Machine,
    session: Option<RunningSession>,
    /// Bumped on every spawn; signals from older generations are ignored.
    epoch: u64,
    degraded: bool,
    /// Effective selector: configured until negotiation narrows it.
    selector: DocumentSelector,
    diagnostics: DiagnosticsSink,
    signal_tx: mpsc::Sender<SessionSignal>,
    signal_rx: mpsc::Receiver<SessionSignal>,
    /// Correlation-id counter, shared across restarts so ids are never
    /// reused within the session.
    next_id: Arc<AtomicU64>,
    /// Host-facing events accumulated since the last poll.
    buffered: Vec<SessionEvent>,
}

impl Supervisor {
    /// Spawn the configured process and run the initialize handshake.
    ///
    /// Spawn and handshake failures do not error here — they go through
    /// the init-failure policy and leave the session either degraded or
    /// `Failed`; inspect [`Supervisor::state`] and the first
    /// [`Supervisor::poll`] for the outcome.
    pub async fn start(
        config: SessionConfig,
        workspace_root: impl Into<PathBuf>,
        profile: ProfileKind,
        policies: Policies,
    ) -> Result<Self, SelectorError> {
        let selector = DocumentSelector::compile(&config.document_selector)?;
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let session_id = SessionId::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));

        let mut diagnostics = DiagnosticsSink::new(config.languages.clone());
        diagnostics.set_selector(selector.clone());

        let mut supervisor = Self {
            machine: Machine::new(session_id, policies),
            session: None,
            epoch: 0,
            degraded: false,
            selector,
            diagnostics,
            signal_tx,
            signal_rx,
            next_id: Arc::new(AtomicU64::new(1)),
            buffered: Vec::new(),
            config,
            workspace_root: workspace_root.into(),
            profile,
        };

        let event = supervisor.spawn_session().await;
        supervisor.apply_event(event).await;
        Ok(supervisor)
    }

    /// Drain pending transport signals, up to `budget`, and return the
    /// host-facing events produced since the last poll.
    ///
    /// Non-blocking: returns immediately when no signals are queued.
    pub async fn poll(&mut self, budget: usize) -> Vec<SessionEvent> {
        let mut handled = 0;
        while handled < budget {
            match self.signal_rx.try_recv() {
                Ok(signal) => {
                    handled += 1;
                    if signal.epoch != self.epoch {
                        tracing::trace!(
                            epoch = signal.epoch,
                            current = self.epoch,
                            "ignoring signal from a replaced process"
                        );
                        continue;
                    }
                    match signal.kind {
                        SignalKind::Notification { method, params } => {
                            self.handle_notification(&method, params);
                        }
                        SignalKind::Closed { cause } => {
                            self.apply_event(Event::TransportClosed { cause }).await;
                        }
                        SignalKind::IoError { detail } => {
                            self.apply_event(Event::TransportIoError { detail }).await;
                        }
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        std::mem::take(&mut self.buffered)
    }

    /// Forward a document edit to the process, filtered by the negotiated
    /// selector. Documents the session did not ask for are skipped
    /// silently; a torn-down session fails fast.
    pub async fn document_changed(&mut self, path: &Path, text: &str) -> Result<(), ClientError> {
        if !self.machine.state().is_open() {
            return Err(ClientError::SessionClosed);
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Ok(());
        };
        let Some(language) = self.config.language_for_extension(ext).map(String::from) else {
            return Ok(());
        };
        let uri = match protocol::path_to_file_uri(path) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!("skipping document sync: {e}");
                return Ok(());
            }
        };
        if !self.selector.matches(uri.scheme(), &language, uri.path()) {
            tracing::trace!(uri = %uri, "document outside negotiated selector");
            return Ok(());
        }

        match self.session.as_mut() {
            Some(session) => session.document_changed(uri.as_str(), &language, text).await,
            // Degraded without a live process: nothing to notify.
            None => Ok(()),
        }
    }

    /// Send a request to the process and await its response under the
    /// configured bound.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        if !self.machine.state().is_open() {
            return Err(ClientError::SessionClosed);
        }
        let Some(session) = &self.session else {
            return Err(ClientError::SessionClosed);
        };
        session
            .router()
            .request(
                method,
                params,
                Duration::from_millis(self.config.request_timeout_ms),
            )
            .await
    }

    /// Request an orderly teardown: graceful shutdown, bounded grace
    /// wait, force kill. Pending requests are cancelled with
    /// [`ClientError::SessionClosed`].
    pub async fn shutdown(&mut self) {
        self.apply_event(Event::ShutdownRequested).await;
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.machine.session_id()
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.machine.restart_count()
    }

    /// Whether the session is running without a completed handshake.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Immutable view of all retained diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Feed one event through the machine and execute the effects it
    /// returns, iterating until the queue drains (a restart's spawn
    /// produces the next negotiation event, and so on).
    async fn apply_event(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let before = self.machine.state();
            let effects = self.machine.handle(event);
            let after = self.machine.state();
            if before != after {
                tracing::info!(
                    session = %self.machine.session_id(),
                    from = before.label(),
                    to = after.label(),
                    "session state changed"
                );
                self.buffered.push(SessionEvent::StateChanged { state: after });
            }

            for effect in effects {
                match effect {
                    Effect::CancelPending => {
                        if let Some(session) = &self.session {
                            session.router().close().await;
                        }
                    }
                    Effect::Discard => {
                        if let Some(session) = self.session.take() {
                            session.abandon().await;
                        }
                    }
                    Effect::Spawn => {
                        let event = self.spawn_session().await;
                        queue.push_back(event);
                    }
                    Effect::Terminate => {
                        if let Some(session) = self.session.take() {
                            session
                                .shutdown(Duration::from_millis(self.config.shutdown_grace_ms))
                                .await;
                        }
                        queue.push_back(Event::ProcessExited);
                    }
                    Effect::EmitClosure(reason) => {
                        self.buffered
                            .push(SessionEvent::UnrecoverableClosure { reason });
                    }
                    Effect::EmitDegraded { reason } => {
                        self.degraded = true;
                        tracing::warn!(%reason, "initialization failed, continuing degraded");
                        self.buffered
                            .push(SessionEvent::InitializationDegraded { reason });
                    }
                }
            }
        }
    }

    /// Launch a fresh process and run the handshake; returns the
    /// negotiation event to feed back into the machine.
    async fn spawn_session(&mut self) -> Event {
        self.epoch += 1;
        self.degraded = false;

        let spawned = RunningSession::spawn(
            &self.config,
            self.profile,
            self.epoch,
            self.signal_tx.clone(),
            self.next_id.clone(),
        )
        .await;

        match spawned {
            Ok(session) => match negotiate(session.router(), &self.config, &self.workspace_root)
                .await
            {
                Ok(selector) => {
                    self.selector = selector;
                    self.diagnostics.set_selector(self.selector.clone());
                    self.session = Some(session);
                    Event::NegotiationSucceeded
                }
                Err(error) => {
                    // Keep the transport: a process that botched its
                    // handshake may still be doing useful work.
                    self.session = Some(session);
                    Event::NegotiationFailed {
                        reason: error.to_string(),
                    }
                }
            },
            Err(error) => Event::NegotiationFailed {
                reason: format!("{error:#}"),
            },
        }
    }

    fn handle_notification(&mut self, method: &str, params: Option<serde_json::Value>) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some(params) = params else { return };
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => {
                        let Ok(uri) = Url::parse(&published.uri) else {
                            tracing::debug!(uri = %published.uri, "unparseable diagnostics uri");
                            return;
                        };
                        let items: Vec<Diagnostic> = published
                            .diagnostics
                            .iter()
                            .map(WireDiagnostic::to_diagnostic)
                            .collect();
                        if self.diagnostics.publish(&uri, items.clone()) {
                            self.buffered.push(SessionEvent::Diagnostics { uri, items });
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to parse publishDiagnostics");
                    }
                }
            }
            other => tracing::trace!(method = other, "unhandled notification"),
        }
    }

    /// Signal sender for tests that inject transport events.
    #[cfg(test)]
    pub(crate) fn signal_tx(&self) -> &mpsc::Sender<SessionSignal> {
        &self.signal_tx
    }
}
