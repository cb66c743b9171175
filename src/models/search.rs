//! Search query model.

use serde::{Deserialize, Serialize};

/// A literature search issued once per run.
///
/// Immutable after the run starts; it is persisted with the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Free-text search terms
    pub text: String,

    /// Maximum number of results per source
    pub max_results: usize,

    /// Only query these source ids (None = every configured source)
    pub source_filter: Option<Vec<String>>,
}

impl Query {
    /// Create a new query with the default result limit
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_results: 10,
            source_filter: None,
        }
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Restrict the query to the given sources
    pub fn sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.source_filter = if ids.is_empty() { None } else { Some(ids) };
        self
    }

    /// Whether the given source should be queried
    pub fn applies_to(&self, source_id: &str) -> bool {
        match &self.source_filter {
            Some(ids) => ids.iter().any(|id| id == source_id),
            None => true,
        }
    }

    /// Trimmed query text, or None if there is nothing to search for
    pub fn terms(&self) -> Option<&str> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}
