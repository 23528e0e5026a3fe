//! Client-side bridge that supervises an external language-analysis
//! process: process lifecycle, framed JSON-RPC transport, request/response
//! correlation, capability negotiation, restart policy, and diagnostics
//! aggregation.

pub mod codec;

pub(crate) mod diagnostics;
pub(crate) mod negotiate;
pub(crate) mod protocol;
pub(crate) mod router;
pub(crate) mod session;

mod machine;
mod supervisor;

pub use machine::Policies;
pub use supervisor::Supervisor;
pub use tether_types::{
    ClientError, CloseAction, ClosureReason, Diagnostic, DiagnosticsSnapshot, DocumentFilter,
    DocumentSelector, ErrorAction, InitFailureAction, InvocationProfile, ProfileKind,
    SelectorError, SessionConfig, SessionEvent, SessionId, SessionState, Severity,
};
