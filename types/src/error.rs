//! Error taxonomy for the client bridge.
//!
//! Transport failures never cross component boundaries as raw errors:
//! the supervisor intercepts them and turns them into state transitions
//! plus policy decisions. Callers of the request API only ever see the
//! variants below.

use thiserror::Error;

/// Failures surfaced by the session supervisor and its request API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The byte stream to the process ended (orderly exit or EOF).
    #[error("transport closed")]
    TransportClosed,

    /// A read or write on the stream failed mid-session.
    #[error("transport I/O error: {detail}")]
    TransportIo { detail: String },

    /// The initialize handshake did not complete.
    #[error("initialization failed: {reason}")]
    InitializationFailed { reason: String },

    /// The process answered a request with a protocol-level error.
    #[error("server error {code}: {message}")]
    ResponseError { code: i64, message: String },

    /// A response arrived whose correlation id has no pending request.
    ///
    /// Recorded for observability only — never returned to a caller.
    #[error("no pending request for response id {id}")]
    UnexpectedResponse { id: u64 },

    /// A pending request exceeded its caller-specified bound and was evicted.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The operation was attempted after session teardown.
    #[error("session closed")]
    SessionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_detail() {
        let err = ClientError::ResponseError {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert_eq!(err.to_string(), "server error -32601: method not found");

        let err = ClientError::Timeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "request timed out after 250 ms");
    }
}
