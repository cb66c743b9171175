//! Core data models for the harvesting pipeline.

mod outcome;
mod paper;
mod run;
mod search;

pub use outcome::{FailureReason, Outcome};
pub use paper::{CanonicalRecord, Enrichment, EnrichmentStatus, RawCandidate, RawCandidateBuilder};
pub use run::{RecordSummary, RunReport, RunState, SourceStatus, SourceSummary, Stage};
pub use search::Query;
