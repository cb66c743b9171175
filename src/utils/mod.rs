//! Utility modules supporting the harvesting pipeline.
//!
//! - [`Resilience`] / [`RetryPolicy`]: retries with exponential backoff, jitter,
//!   per-attempt timeout and identity rotation
//! - [`IdentityPool`]: round-robin user agent / proxy pool shared by all calls
//! - [`HttpClient`]: reqwest clients keyed by proxy
//! - [`RateLimiter`]: per-source request pacing
//! - [`Merger`]: deduplicate raw candidates into canonical records
//!
//! # Merging
//!
//! ```rust
//! use scholar_harvest::models::RawCandidate;
//! use scholar_harvest::utils::Merger;
//!
//! let candidates = vec![
//!     RawCandidate::builder("arxiv", "1", "Attention Is All You Need").year(Some(2017)).build(),
//!     RawCandidate::builder("semantic", "2", "Attention is all you need.").year(Some(2017)).build(),
//! ];
//! let records = Merger::default().merge(&candidates);
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].source_ids, vec!["arxiv", "semantic"]);
//! ```

mod dedup;
mod http;
mod identity;
pub mod ids;
mod rate_limit;
mod retry;

pub use dedup::{
    merge_candidates, normalize_title, similarity_key, title_similarity, Merger,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use http::{checked_text, retry_after, HttpClient};
pub use identity::{Identity, IdentityPool, DEFAULT_USER_AGENTS};
pub use rate_limit::RateLimiter;
pub use retry::{Resilience, RetryPolicy};
