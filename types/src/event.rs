//! Session lifecycle states and host-facing events.

use url::Url;

use crate::diagnostic::Diagnostic;

/// Connection state of a supervised session.
///
/// `Failed` is terminal and reachable from any non-`Closed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Process spawned, initialize handshake outstanding.
    Starting,
    /// Steady state; messages flowing.
    Running,
    /// Teardown requested; waiting for the process to exit.
    Closing,
    /// Terminal: no further messages accepted.
    Closed,
    /// Terminal: initialization or supervision failed fatally.
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Whether the session still accepts outgoing traffic.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Why a session's transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureReason {
    /// The process exited or closed its stream cleanly.
    ProcessExited,
    /// The stream became unusable; the underlying cause is attached.
    StreamFailed { detail: String },
}

impl std::fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessExited => write!(f, "process exited"),
            Self::StreamFailed { detail } => write!(f, "stream failed: {detail}"),
        }
    }
}

/// An event emitted by the supervisor for the host layer.
///
/// The core emits typed events only; the presentation layer owns prompts,
/// buttons, and editor decorations.
#[derive(Debug)]
pub enum SessionEvent {
    /// Diagnostics for a document were replaced (empty = cleared).
    Diagnostics { uri: Url, items: Vec<Diagnostic> },
    /// The session moved to a new state.
    StateChanged { state: SessionState },
    /// The connection closed and policy chose not to restart.
    ///
    /// Emitted at most once per closure; the host maps this to its own
    /// affordances (inspect logs, dismiss).
    UnrecoverableClosure { reason: ClosureReason },
    /// Initialization failed but policy classified it as benign; the
    /// session continues in degraded mode.
    InitializationDegraded { reason: String },
}
