//! Wire-level message types for the JSON-RPC channel.
//!
//! A message is one of three envelopes: a request (carries a correlation
//! id, expects exactly one response), a notification (fire-and-forget),
//! or a response (correlates to a prior request id, carries a result or
//! an error).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tether_types::{Diagnostic, DocumentFilter, Severity};

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Protocol-level error attached to a response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A decoded incoming frame, classified by envelope kind.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response {
        id: u64,
        result: Option<serde_json::Value>,
        error: Option<RpcError>,
    },
    /// A request originated by the process; `id` is echoed verbatim in
    /// the reply, whatever JSON shape the process chose for it.
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

/// Classify a frame. Returns `None` for shapes that are not a valid
/// envelope; callers drop those with a trace record.
pub(crate) fn classify(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(Incoming::Response {
            id: id_val.as_u64()?,
            result: frame.get("result").cloned(),
            error: frame
                .get("error")
                .and_then(|e| serde_json::from_value(e.clone()).ok()),
        }),
        (Some(id_val), Some(method), _) => Some(Incoming::Request {
            id: id_val.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Build a JSON-RPC error response with code -32601 for an unhandled
/// process-originated request.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": -32601,
            "message": format!("Method not found: {method}")
        }
    })
}

/// Initialize params: the client's capability document plus the document
/// filters it is configured to forward.
pub(crate) fn initialize_params(root_uri: &str, selector: &[DocumentFilter]) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            }
        },
        "initializationOptions": {
            "documentSelector": selector
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

/// Extract the document filters the process advertises in its initialize
/// result. Absent or malformed means the process declared no preference.
pub(crate) fn server_selector(result: &serde_json::Value) -> Option<Vec<DocumentFilter>> {
    let raw = result.get("capabilities")?.get("documentSelector")?;
    serde_json::from_value(raw.clone()).ok()
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDiagnostic {
    pub range: WireRange,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRange {
    pub start: WirePosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePosition {
    pub line: u32,
    pub character: u32,
}

impl WireDiagnostic {
    /// Missing or out-of-range severity falls back to Warning here, at
    /// the boundary.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(Severity::from_wire)
                .unwrap_or(Severity::Warning),
            self.message.clone(),
            self.range.start.line,
            self.range.start.character,
            self.source.clone().unwrap_or_else(|| String::from("server")),
        )
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
