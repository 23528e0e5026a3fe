//! Session configuration, deserialized at the host boundary.

use std::collections::HashMap;

use serde::Deserialize;

use crate::document::DocumentFilter;

/// How to launch the analysis process: command, arguments, and
/// environment overrides applied on top of the inherited environment.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationProfile {
    /// Executable command, resolved through PATH.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables, e.g. a verbosity flag.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Which invocation profile to launch with. Both share the same
/// transport contract; `Debug` typically differs only in flags and
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    #[default]
    Run,
    Debug,
}

/// Configuration for one supervised session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Normal invocation.
    pub run: InvocationProfile,
    /// Debug invocation; falls back to `run` when absent.
    #[serde(default)]
    pub debug: Option<InvocationProfile>,
    /// Client-side document filters; intersected with what the process
    /// advertises during the handshake. Empty means no restriction.
    #[serde(default)]
    pub document_selector: Vec<DocumentFilter>,
    /// File extension → language kind, e.g. "html" → "html". Used to
    /// classify documents for selector matching.
    #[serde(default)]
    pub languages: HashMap<String, String>,
    /// Bounded wait for the initialize handshake.
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,
    /// Default bound for ordinary requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Grace period before a terminating process is forcibly killed.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_initialize_timeout_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

impl SessionConfig {
    /// Resolve the invocation profile for the requested kind.
    #[must_use]
    pub fn profile(&self, kind: ProfileKind) -> &InvocationProfile {
        match kind {
            ProfileKind::Run => &self.run,
            ProfileKind::Debug => self.debug.as_ref().unwrap_or(&self.run),
        }
    }

    /// Language kind for a file extension, if one is configured.
    #[must_use]
    pub fn language_for_extension(&self, ext: &str) -> Option<&str> {
        self.languages.get(ext).map(String::as_str)
    }
}
