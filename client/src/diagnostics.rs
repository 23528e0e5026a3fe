//! Diagnostics sink — retains per-document diagnostics with replace
//! semantics.
//!
//! A publish is always a snapshot for its document, never a delta: the new
//! set fully replaces the old one, and an empty set removes the entry.
//! Documents outside the negotiated selector are dropped at ingestion so
//! the store only ever holds traffic the session asked for.

use std::collections::HashMap;
use std::path::Path;

use url::Url;

use tether_types::{Diagnostic, DiagnosticsSnapshot, DocumentSelector};

pub(crate) struct DiagnosticsSink {
    selector: DocumentSelector,
    /// File extension → language kind; unmapped extensions classify as
    /// themselves.
    languages: HashMap<String, String>,
    data: HashMap<Url, Vec<Diagnostic>>,
}

impl DiagnosticsSink {
    pub fn new(languages: HashMap<String, String>) -> Self {
        Self {
            selector: DocumentSelector::unrestricted(),
            languages,
            data: HashMap::new(),
        }
    }

    /// Install the selector negotiated for the current session.
    pub fn set_selector(&mut self, selector: DocumentSelector) {
        self.selector = selector;
    }

    /// Replace the stored set for a document. Returns whether the publish
    /// was retained; non-matching documents are dropped here, not at read
    /// time.
    pub fn publish(&mut self, uri: &Url, items: Vec<Diagnostic>) -> bool {
        let language = self.language_of(uri);
        if !self.selector.matches(uri.scheme(), &language, uri.path()) {
            tracing::debug!(uri = %uri, %language, "dropping diagnostics outside negotiated selector");
            return false;
        }

        if items.is_empty() {
            self.data.remove(uri);
        } else {
            self.data.insert(uri.clone(), items);
        }
        true
    }

    /// Publish an empty set for a document.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn clear(&mut self, uri: &Url) -> bool {
        self.publish(uri, Vec::new())
    }

    /// Immutable view, error-bearing documents first, then by URI.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut documents: Vec<(Url, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        documents.sort_by(|a, b| {
            let a_has_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_has_errors = b.1.iter().any(|d| d.severity().is_error());
            b_has_errors
                .cmp(&a_has_errors)
                .then_with(|| a.0.as_str().cmp(b.0.as_str()))
        });

        DiagnosticsSnapshot::new(documents)
    }

    fn language_of(&self, uri: &Url) -> String {
        let ext = Path::new(uri.path())
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.languages
            .get(ext)
            .cloned()
            .unwrap_or_else(|| ext.to_string())
    }
}
