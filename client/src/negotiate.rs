//! Capability handshake with the analysis process.
//!
//! The client declares its feature set and the document filters it is
//! configured to forward; the process answers with its own capability
//! document. The effective selector for the session is the intersection
//! of the two. The whole exchange runs under a bounded wait — a process
//! that never answers is an initialization failure, not a hang.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use tether_types::{ClientError, DocumentSelector, SessionConfig};

use crate::protocol;
use crate::router::Router;

fn init_failed(reason: impl Display) -> ClientError {
    ClientError::InitializationFailed {
        reason: reason.to_string(),
    }
}

/// Run the initialize handshake and compute the effective selector.
pub(crate) async fn negotiate(
    router: &Router,
    config: &SessionConfig,
    workspace_root: &Path,
) -> Result<DocumentSelector, ClientError> {
    let root_uri = protocol::path_to_file_uri(workspace_root).map_err(init_failed)?;

    let params = protocol::initialize_params(root_uri.as_str(), &config.document_selector);
    tracing::debug!(root = %root_uri, "sending initialize");

    let result = router
        .request(
            "initialize",
            Some(params),
            Duration::from_millis(config.initialize_timeout_ms),
        )
        .await
        .map_err(init_failed)?;

    let filters = match protocol::server_selector(&result) {
        Some(server) => DocumentSelector::intersect(&config.document_selector, &server),
        // No advertised preference: the client configuration applies verbatim.
        None => config.document_selector.clone(),
    };
    let selector = DocumentSelector::compile(&filters).map_err(init_failed)?;

    router
        .notify("initialized", Some(serde_json::json!({})))
        .await
        .map_err(init_failed)?;

    tracing::info!(filters = filters.len(), "handshake complete");
    Ok(selector)
}
