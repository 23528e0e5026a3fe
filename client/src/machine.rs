//! Session state machine.
//!
//! States move `Starting → Running → Closing → Closed`, with `Failed`
//! terminal from any non-`Closed` state. Transitions are a pure function
//! of the current state, the incoming event, and the policy outcomes; the
//! returned effects are executed by the supervisor's single control flow.
//! Transport tasks never mutate session state directly.

use tether_types::{
    CloseAction, ClosureReason, ErrorAction, InitFailureAction, SessionId, SessionState,
};

/// Decision functions consulted on failure events.
///
/// An orderly close and a mid-stream I/O error are distinct events with
/// distinct policies: the process choosing to exit is a signal, a stream
/// glitch usually is not. Initialization failures get their own policy
/// because some are benign (the process simply has nothing to do in this
/// workspace) and some are not.
pub struct Policies {
    /// Consulted on orderly transport closure while running.
    pub on_close: Box<dyn Fn(&ClosureReason) -> CloseAction + Send + Sync>,
    /// Consulted on a transport I/O error while running.
    pub on_error: Box<dyn Fn(&str) -> ErrorAction + Send + Sync>,
    /// Consulted when the initialize handshake does not complete.
    pub on_init_failure: Box<dyn Fn(&str) -> InitFailureAction + Send + Sync>,
}

impl Default for Policies {
    /// Never auto-restart a process that chose to stop, ride out stream
    /// glitches, and treat a failed handshake as benign.
    fn default() -> Self {
        Self {
            on_close: Box::new(|_| CloseAction::DoNotRestart),
            on_error: Box::new(|_| ErrorAction::Continue),
            on_init_failure: Box::new(|_| InitFailureAction::Degrade),
        }
    }
}

impl std::fmt::Debug for Policies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Policies")
    }
}

/// An input to the state machine.
#[derive(Debug)]
pub(crate) enum Event {
    NegotiationSucceeded,
    NegotiationFailed { reason: String },
    /// Orderly end of the transport stream.
    TransportClosed { cause: Option<String> },
    /// Read/write failure mid-stream.
    TransportIoError { detail: String },
    ShutdownRequested,
    /// The child process confirmed exit during teardown.
    ProcessExited,
}

/// A side effect the supervisor must execute after a transition.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Launch a fresh process and renegotiate.
    Spawn,
    /// Fail every pending request with `SessionClosed`.
    CancelPending,
    /// Drop the current process handle and its tasks.
    Discard,
    /// Gracefully terminate the current process.
    Terminate,
    /// Surface the single user-facing unrecoverable-closure notice.
    EmitClosure(ClosureReason),
    /// Record a benign initialization failure; the session continues
    /// degraded.
    EmitDegraded { reason: String },
}

pub(crate) struct Machine {
    session_id: SessionId,
    state: SessionState,
    restart_count: u32,
    policies: Policies,
}

impl Machine {
    pub fn new(session_id: SessionId, policies: Policies) -> Self {
        Self {
            session_id,
            state: SessionState::Starting,
            restart_count: 0,
            policies,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Apply one event: update the state, return the effects to execute.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        use SessionState::{Closed, Closing, Failed, Running, Starting};

        let (next, effects) = match (self.state, event) {
            (Starting, Event::NegotiationSucceeded) => (Running, vec![]),
            (Starting, Event::NegotiationFailed { reason }) => self.init_failure(reason),
            (Starting, Event::TransportClosed { cause }) => {
                // The stream died before the handshake finished.
                let reason =
                    cause.unwrap_or_else(|| "transport closed during initialization".to_string());
                self.init_failure(reason)
            }
            (Starting | Running, Event::ShutdownRequested) => (Closing, vec![Effect::Terminate]),
            (Running, Event::TransportClosed { cause }) => {
                let reason = match cause {
                    None => ClosureReason::ProcessExited,
                    Some(detail) => ClosureReason::StreamFailed { detail },
                };
                match (self.policies.on_close)(&reason) {
                    CloseAction::Restart => {
                        self.restart_count += 1;
                        tracing::info!(
                            session = %self.session_id,
                            restarts = self.restart_count,
                            "transport closed, restarting"
                        );
                        (
                            Starting,
                            vec![Effect::CancelPending, Effect::Discard, Effect::Spawn],
                        )
                    }
                    CloseAction::DoNotRestart => (
                        Closed,
                        vec![
                            Effect::CancelPending,
                            Effect::Discard,
                            Effect::EmitClosure(reason),
                        ],
                    ),
                }
            }
            (Running, Event::TransportIoError { detail }) => {
                match (self.policies.on_error)(&detail) {
                    ErrorAction::Continue => {
                        tracing::warn!(%detail, "transport error, continuing");
                        (Running, vec![])
                    }
                    ErrorAction::Shutdown => (Closing, vec![Effect::Terminate]),
                }
            }
            (Closing, Event::ProcessExited) => (Closed, vec![Effect::CancelPending]),
            // Teardown is already in flight; the exit confirmation follows.
            (
                Closing,
                Event::TransportClosed { .. }
                | Event::TransportIoError { .. }
                | Event::ShutdownRequested,
            ) => (Closing, vec![]),
            // Terminal states absorb everything.
            (state @ (Closed | Failed), _) => (state, vec![]),
            (state, event) => {
                tracing::trace!(?event, from = state.label(), "ignoring stale event");
                (state, vec![])
            }
        };

        self.state = next;
        effects
    }

    fn init_failure(&self, reason: String) -> (SessionState, Vec<Effect>) {
        match (self.policies.on_init_failure)(&reason) {
            InitFailureAction::Degrade => (
                SessionState::Running,
                vec![Effect::EmitDegraded { reason }],
            ),
            InitFailureAction::Fatal => (
                SessionState::Failed,
                vec![Effect::CancelPending, Effect::Discard],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(policies: Policies) -> Machine {
        Machine::new(SessionId::new(11), policies)
    }

    fn running(policies: Policies) -> Machine {
        let mut m = machine(policies);
        m.handle(Event::NegotiationSucceeded);
        assert_eq!(m.state(), SessionState::Running);
        m
    }

    fn restart_policies() -> Policies {
        Policies {
            on_close: Box::new(|_| CloseAction::Restart),
            ..Policies::default()
        }
    }

    #[test]
    fn test_negotiation_success_reaches_running() {
        let mut m = machine(Policies::default());
        let effects = m.handle(Event::NegotiationSucceeded);
        assert_eq!(m.state(), SessionState::Running);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_close_without_restart_reaches_closed_with_one_notice() {
        let mut m = running(Policies::default());
        let effects = m.handle(Event::TransportClosed { cause: None });

        assert_eq!(m.state(), SessionState::Closed);
        assert_eq!(
            effects,
            vec![
                Effect::CancelPending,
                Effect::Discard,
                Effect::EmitClosure(ClosureReason::ProcessExited),
            ]
        );

        // A second closure event in Closed produces nothing further.
        let effects = m.handle(Event::TransportClosed { cause: None });
        assert!(effects.is_empty());
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn test_close_with_restart_goes_back_to_starting() {
        let mut m = running(restart_policies());
        let effects = m.handle(Event::TransportClosed { cause: None });

        assert_eq!(m.state(), SessionState::Starting);
        assert!(effects.contains(&Effect::Spawn));
        assert_eq!(m.restart_count(), 1);
    }

    #[test]
    fn test_closure_never_stays_running() {
        for policies in [Policies::default(), restart_policies()] {
            let mut m = running(policies);
            m.handle(Event::TransportClosed { cause: None });
            assert!(
                matches!(m.state(), SessionState::Closed | SessionState::Starting),
                "closure must leave Running, got {:?}",
                m.state()
            );
        }
    }

    #[test]
    fn test_three_restarts_preserve_session_identity() {
        let mut m = running(restart_policies());
        let original_id = m.session_id();

        for _ in 0..3 {
            m.handle(Event::TransportClosed { cause: None });
            assert_eq!(m.state(), SessionState::Starting);
            m.handle(Event::NegotiationSucceeded);
            assert_eq!(m.state(), SessionState::Running);
        }

        assert_eq!(m.restart_count(), 3);
        assert_eq!(m.session_id(), original_id);
    }

    #[test]
    fn test_io_error_continue_stays_running() {
        let mut m = running(Policies::default());
        let effects = m.handle(Event::TransportIoError {
            detail: "broken pipe".to_string(),
        });
        assert_eq!(m.state(), SessionState::Running);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_io_error_shutdown_escalates_to_closing() {
        let mut m = running(Policies {
            on_error: Box::new(|_| ErrorAction::Shutdown),
            ..Policies::default()
        });
        let effects = m.handle(Event::TransportIoError {
            detail: "broken pipe".to_string(),
        });
        assert_eq!(m.state(), SessionState::Closing);
        assert_eq!(effects, vec![Effect::Terminate]);

        let effects = m.handle(Event::ProcessExited);
        assert_eq!(m.state(), SessionState::Closed);
        assert_eq!(effects, vec![Effect::CancelPending]);
    }

    #[test]
    fn test_shutdown_request_runs_teardown() {
        let mut m = running(Policies::default());
        assert_eq!(m.handle(Event::ShutdownRequested), vec![Effect::Terminate]);
        assert_eq!(m.state(), SessionState::Closing);

        m.handle(Event::ProcessExited);
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn test_eof_during_closing_is_not_a_closure_event() {
        let mut m = running(Policies::default());
        m.handle(Event::ShutdownRequested);

        // The reader's EOF arrives while teardown is in flight.
        let effects = m.handle(Event::TransportClosed { cause: None });
        assert!(effects.is_empty(), "no notice during deliberate teardown");
        assert_eq!(m.state(), SessionState::Closing);
    }

    #[test]
    fn test_init_failure_degrade_keeps_session_alive() {
        let mut m = machine(Policies::default());
        let effects = m.handle(Event::NegotiationFailed {
            reason: "nothing to analyze here".to_string(),
        });
        assert_eq!(m.state(), SessionState::Running);
        assert_eq!(
            effects,
            vec![Effect::EmitDegraded {
                reason: "nothing to analyze here".to_string()
            }]
        );
    }

    #[test]
    fn test_init_failure_fatal_reaches_failed() {
        let mut m = machine(Policies {
            on_init_failure: Box::new(|_| InitFailureAction::Fatal),
            ..Policies::default()
        });
        let effects = m.handle(Event::NegotiationFailed {
            reason: "bad handshake".to_string(),
        });
        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(effects, vec![Effect::CancelPending, Effect::Discard]);

        // Failed is terminal.
        assert!(m.handle(Event::NegotiationSucceeded).is_empty());
        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn test_transport_closed_during_starting_is_init_failure() {
        let mut m = machine(Policies {
            on_init_failure: Box::new(|_| InitFailureAction::Fatal),
            ..Policies::default()
        });
        m.handle(Event::TransportClosed {
            cause: Some("process exited during handshake".to_string()),
        });
        assert_eq!(m.state(), SessionState::Failed);
    }

    #[test]
    fn test_policy_receives_closure_reason() {
        let mut m = running(Policies {
            on_close: Box::new(|reason| match reason {
                ClosureReason::ProcessExited => CloseAction::DoNotRestart,
                ClosureReason::StreamFailed { .. } => CloseAction::Restart,
            }),
            ..Policies::default()
        });

        m.handle(Event::TransportClosed {
            cause: Some("desync".to_string()),
        });
        assert_eq!(m.state(), SessionState::Starting, "stream failure restarts");

        m.handle(Event::NegotiationSucceeded);
        m.handle(Event::TransportClosed { cause: None });
        assert_eq!(m.state(), SessionState::Closed, "clean exit does not");
    }
}
