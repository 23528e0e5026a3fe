//! Decision outcomes for the supervisor's failure policies.
//!
//! An orderly close (the process chose to stop) and a transport I/O error
//! (a glitch in the byte stream) are distinct events with distinct
//! policies. Each decision is recomputed per event, never persisted.

/// Outcome of the close-action policy, consulted on orderly transport
/// closure while the session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Spawn a fresh process, preserving session identity.
    Restart,
    /// Transition to `Closed` and surface a single user-facing notice.
    DoNotRestart,
}

/// Outcome of the error-action policy, consulted on a transport I/O
/// error while the session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep the session alive; log and move on.
    Continue,
    /// Escalate to an orderly teardown.
    Shutdown,
}

/// Outcome of the init-failure policy, consulted when the initialize
/// handshake does not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFailureAction {
    /// Benign: stay alive in degraded mode without reporting upward.
    Degrade,
    /// Fatal: the session transitions to `Failed`.
    Fatal,
}
