//! # Scholar Harvest
//!
//! Resilient multi-source academic literature harvesting: query several
//! search backends, merge their results into canonical records, enrich them
//! with a language model and hand them to a reference manager.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (RawCandidate, CanonicalRecord, Outcome, RunState)
//! - [`sources`]: Search source adapters behind the [`Source`] trait
//! - [`enrich`]: Bounded-concurrency language-model enrichment
//! - [`sink`]: Reference-manager sinks (Zotero, JSON file, memory)
//! - [`pipeline`]: The checkpointed orchestrator
//! - [`utils`]: Retry/identity rotation, HTTP, rate limiting and merging
//! - [`config`]: Configuration management

pub mod config;
pub mod enrich;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use models::{CanonicalRecord, Outcome, Query, RawCandidate, RunReport};
pub use pipeline::{Pipeline, PipelineError};
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
