//! Document identity predicates.
//!
//! A [`DocumentFilter`] is one (scheme, language, pattern) predicate; a
//! [`DocumentSelector`] is a set of them. A document matches the selector
//! if any filter matches, and matches a filter when every *present* field
//! matches (an absent field is a wildcard). The selector negotiated at
//! session start is immutable for the session's lifetime.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One document predicate. All fields optional; an empty filter matches
/// every document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// URI scheme, e.g. "file".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Language kind, e.g. "html".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Glob matched against the document path, e.g. `**/*.component.html`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl DocumentFilter {
    /// Narrow two filters into the predicate both accept.
    ///
    /// Returns `None` when the filters are incompatible (both sides pin
    /// the same field to different values).
    fn narrow(&self, other: &Self) -> Option<Self> {
        Some(Self {
            scheme: narrow_field(&self.scheme, &other.scheme)?,
            language: narrow_field(&self.language, &other.language)?,
            pattern: narrow_field(&self.pattern, &other.pattern)?,
        })
    }
}

fn narrow_field(a: &Option<String>, b: &Option<String>) -> Option<Option<String>> {
    match (a, b) {
        (None, None) => Some(None),
        (Some(v), None) | (None, Some(v)) => Some(Some(v.clone())),
        (Some(x), Some(y)) if x == y => Some(Some(x.clone())),
        (Some(_), Some(_)) => None,
    }
}

#[derive(Debug, Error)]
#[error("invalid document selector pattern: {0}")]
pub struct SelectorError(#[from] globset::Error);

#[derive(Clone)]
struct CompiledFilter {
    filter: DocumentFilter,
    glob: Option<GlobMatcher>,
}

/// A compiled set of document predicates.
///
/// An empty selector is unrestricted — no negotiation has narrowed the
/// traffic, so everything is forwarded.
#[derive(Clone)]
pub struct DocumentSelector {
    filters: Vec<CompiledFilter>,
}

impl DocumentSelector {
    /// A selector that matches every document.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Compile a filter list, building glob matchers for `pattern` fields.
    pub fn compile(filters: &[DocumentFilter]) -> Result<Self, SelectorError> {
        let mut compiled = Vec::with_capacity(filters.len());
        for filter in filters {
            let glob = match &filter.pattern {
                Some(pattern) => Some(Glob::new(pattern)?.compile_matcher()),
                None => None,
            };
            compiled.push(CompiledFilter {
                filter: filter.clone(),
                glob,
            });
        }
        Ok(Self { filters: compiled })
    }

    /// Intersect a client-configured filter list with a server-advertised
    /// one. Either side empty means "no restriction", so the other side
    /// applies verbatim; otherwise incompatible pairs are dropped and
    /// compatible pairs are narrowed to the predicate both accept.
    #[must_use]
    pub fn intersect(client: &[DocumentFilter], server: &[DocumentFilter]) -> Vec<DocumentFilter> {
        if client.is_empty() {
            return server.to_vec();
        }
        if server.is_empty() {
            return client.to_vec();
        }
        let mut result: Vec<DocumentFilter> = Vec::new();
        for c in client {
            for s in server {
                if let Some(narrowed) = c.narrow(s)
                    && !result.contains(&narrowed)
                {
                    result.push(narrowed);
                }
            }
        }
        result
    }

    /// Whether a document with the given scheme, language kind, and path
    /// passes the selector.
    #[must_use]
    pub fn matches(&self, scheme: &str, language: &str, path: &str) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|c| {
            c.filter.scheme.as_deref().is_none_or(|s| s == scheme)
                && c.filter.language.as_deref().is_none_or(|l| l == language)
                && c.glob.as_ref().is_none_or(|g| g.is_match(path))
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for DocumentSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|c| &c.filter))
            .finish()
    }
}
