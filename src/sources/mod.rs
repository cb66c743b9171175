//! Literature source adapters with a trait-based architecture.
//!
//! Every bibliographic backend implements [`Source`]: one search call that
//! returns raw candidates wrapped in an [`Outcome`]. Adapters do not retry;
//! the orchestrator always calls them through [`resilient_search`], which
//! applies the shared retry policy and identity rotation.
//!
//! # Feature Flags
//!
//! Individual sources can be disabled at compile time using Cargo features:
//!
//! - `arxiv` - Enable the arXiv Atom API source (default: enabled)
//! - `semantic` - Enable the Semantic Scholar Graph API source (default: enabled)
//! - `google_scholar` - Enable the Google Scholar HTML source (default: enabled,
//!   but only queried when listed in `search.sources`)
//!
//! # Runtime Source Configuration
//!
//! The `search.sources` list in the configuration file (or
//! `SCHOLAR_HARVEST__SEARCH__SOURCES`) selects which compiled-in sources are
//! registered, and `--source` on the command line narrows a single run.

#[cfg(feature = "source-arxiv")]
mod arxiv;
mod backfill;
#[cfg(feature = "source-google_scholar")]
mod google_scholar;
mod registry;
#[cfg(feature = "source-semantic")]
mod semantic;

pub mod mock;

#[cfg(feature = "source-arxiv")]
pub use arxiv::ArxivSource;
pub use backfill::{needs_abstract, AbstractBackfill};
#[cfg(feature = "source-google_scholar")]
pub use google_scholar::GoogleScholarSource;
pub use mock::MockSource;
pub use registry::SourceRegistry;
#[cfg(feature = "source-semantic")]
pub use semantic::SemanticScholarSource;

use async_trait::async_trait;

use crate::models::{FailureReason, Outcome, Query, RawCandidate};
use crate::utils::{Identity, Resilience, RetryPolicy};

/// The Source trait defines the interface for all literature backends.
///
/// # Implementing a New Source
///
/// 1. Create a struct that implements `Source`
/// 2. Map transport and parse errors into [`crate::models::FailureReason`]
///    and return them through [`Outcome::failure`] so the retry class is right
/// 3. Register it in [`SourceRegistry::from_config`] or dynamically
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this source (e.g. "arxiv", "semantic")
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Run one search attempt with the given outbound identity.
    ///
    /// Returns at most `query.max_results` candidates.
    async fn search(&self, query: &Query, identity: &Identity) -> Outcome<Vec<RawCandidate>>;

    /// Fetch full records by this source's own ids (one attempt).
    ///
    /// Ids the source does not know are simply absent from the result.
    /// Sources without an id endpoint fail with `InvalidRequest`.
    async fn lookup(
        &self,
        _external_ids: &[String],
        _identity: &Identity,
    ) -> Outcome<Vec<RawCandidate>> {
        Outcome::FatalFailure(FailureReason::InvalidRequest(format!(
            "{} does not support id lookup",
            self.id()
        )))
    }
}

/// Search one source through the resilience wrapper.
pub async fn resilient_search(
    source: &dyn Source,
    query: &Query,
    resilience: &Resilience,
    policy: &RetryPolicy,
) -> Outcome<Vec<RawCandidate>> {
    let label = format!("search:{}", source.id());
    resilience
        .execute(&label, policy, |identity| async move {
            source.search(query, &identity).await
        })
        .await
        .map(|mut candidates| {
            candidates.truncate(query.max_results);
            candidates
        })
}
