//! Registry for managing literature source adapters.

use std::sync::Arc;

use super::Source;
use crate::config::Config;
use crate::models::Query;
use crate::utils::{HttpClient, RateLimiter};

/// Registry of the sources configured for this process.
///
/// Sources keep their registration order; the orchestrator concatenates
/// candidates in that order, which keeps merging deterministic.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the sources listed in `search.sources`.
    ///
    /// Unknown ids and sources whose Cargo feature is disabled are skipped
    /// with a warning.
    pub fn from_config(config: &Config, client: &HttpClient) -> Self {
        let mut registry = Self::new();

        for id in &config.search.sources {
            match Self::build_source(id, config, client) {
                Some(source) => registry.register(source),
                None => tracing::warn!("Source '{}' is unknown or not compiled in, skipping", id),
            }
        }

        registry
    }

    /// Build one source by id with its configured rate, without registering it
    pub fn build_source(id: &str, config: &Config, client: &HttpClient) -> Option<Arc<dyn Source>> {
        let limiter = config.rate_for(id).map(RateLimiter::per_second);
        Self::build(id, config, client, limiter)
    }

    #[allow(unused_variables)]
    fn build(
        id: &str,
        config: &Config,
        client: &HttpClient,
        limiter: Option<RateLimiter>,
    ) -> Option<Arc<dyn Source>> {
        match id {
            #[cfg(feature = "source-arxiv")]
            "arxiv" => {
                let mut source = super::ArxivSource::new(client.clone());
                if let Some(limiter) = limiter {
                    source = source.with_rate_limiter(limiter);
                }
                Some(Arc::new(source))
            }
            #[cfg(feature = "source-semantic")]
            "semantic" => {
                let mut source = super::SemanticScholarSource::new(
                    client.clone(),
                    config.api_keys.semantic_scholar(),
                );
                if let Some(limiter) = limiter {
                    source = source.with_rate_limiter(limiter);
                }
                Some(Arc::new(source))
            }
            #[cfg(feature = "source-google_scholar")]
            "google_scholar" => {
                let mut source = super::GoogleScholarSource::new(client.clone());
                if let Some(limiter) = limiter {
                    source = source.with_rate_limiter(limiter);
                }
                Some(Arc::new(source))
            }
            _ => None,
        }
    }

    /// Register a source; a source with the same id is replaced in place
    pub fn register(&mut self, source: Arc<dyn Source>) {
        match self.sources.iter_mut().find(|s| s.id() == source.id()) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Source>> {
        self.sources.iter().find(|s| s.id() == id)
    }

    /// All registered sources, in registration order
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.iter()
    }

    /// Sources the query should be sent to
    pub fn applicable(&self, query: &Query) -> Vec<Arc<dyn Source>> {
        self.sources
            .iter()
            .filter(|s| query.applies_to(s.id()))
            .cloned()
            .collect()
    }

    /// Get all source IDs
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id())
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
