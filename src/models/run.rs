//! Run state: what a pipeline run has completed so far, and its final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{CanonicalRecord, EnrichmentStatus, FailureReason, Query, RawCandidate};

/// Pipeline stages in execution order.
///
/// A persisted [`RunState`] stores the last stage whose output is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Searching,
    Merging,
    Enriching,
    Sinking,
    Done,
    Failed,
}

impl Stage {
    /// Whether no further work can happen in this stage
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Searching => "searching",
            Stage::Merging => "merging",
            Stage::Enriching => "enriching",
            Stage::Sinking => "sinking",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    /// The stage that runs after this one has completed
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::Searching),
            Stage::Searching => Some(Stage::Merging),
            Stage::Merging => Some(Stage::Enriching),
            Stage::Enriching => Some(Stage::Sinking),
            Stage::Sinking => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Human-readable progress, e.g. "merging complete, next: enriching"
    pub fn progress(self) -> String {
        match (self, self.next()) {
            (Stage::Init, _) => "not started, next: searching".to_string(),
            (_, Some(next)) => format!("{} complete, next: {}", self, next),
            (_, None) => self.name().to_string(),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Progress of one source within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Succeeded { candidates: usize },
    FailedAfterRetries { reason: FailureReason, retryable: bool },
}

impl SourceStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceStatus::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "Pending",
            SourceStatus::Succeeded { .. } => "Succeeded",
            SourceStatus::FailedAfterRetries { .. } => "FailedAfterRetries",
        }
    }
}

/// Durable state of one run, keyed by `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub query: Query,

    /// Last fully completed stage
    pub stage: Stage,

    /// Per-source progress cursor
    #[serde(default)]
    pub sources: BTreeMap<String, SourceStatus>,

    /// Output of the search stage
    #[serde(default)]
    pub candidates: Vec<RawCandidate>,

    /// Output of the merge stage, updated by enrichment
    #[serde(default)]
    pub records: Vec<CanonicalRecord>,

    /// Canonical ids whose enrichment outcome has been collected
    #[serde(default)]
    pub processed: BTreeSet<String>,

    /// Canonical ids still waiting for enrichment
    #[serde(default)]
    pub pending: BTreeSet<String>,

    /// Number of records the sink accepted
    #[serde(default)]
    pub upserted: Option<usize>,

    /// Why the run ended in `Failed`
    #[serde(default)]
    pub failure: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, query: Query) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            query,
            stage: Stage::Init,
            sources: BTreeMap::new(),
            candidates: Vec::new(),
            records: Vec::new(),
            processed: BTreeSet::new(),
            pending: BTreeSet::new(),
            upserted: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Generate a fresh run id from the current time and the query text.
    pub fn generate_id(query: &Query) -> String {
        let now = Utc::now();
        let digest = md5::compute(format!(
            "{}|{}",
            query.text,
            now.timestamp_nanos_opt().unwrap_or_default()
        ));
        format!("{}-{}", now.format("%Y%m%dT%H%M%S"), &format!("{:x}", digest)[..8])
    }

    /// Record that `stage` has completed.
    pub fn advance(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Queue ids for enrichment. Ids already processed stay processed.
    pub fn mark_pending<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for id in ids {
            if !self.processed.contains(id) {
                self.pending.insert(id.to_string());
            }
        }
    }

    /// Move an id from pending to processed.
    pub fn mark_processed(&mut self, id: &str) {
        self.pending.remove(id);
        self.processed.insert(id.to_string());
    }

    /// Number of sources that returned a successful outcome.
    pub fn successful_sources(&self) -> usize {
        self.sources.values().filter(|s| s.is_success()).count()
    }

    /// Summarize the run for display.
    pub fn report(&self) -> RunReport {
        let sources = self
            .sources
            .iter()
            .map(|(source_id, status)| SourceSummary {
                source_id: source_id.clone(),
                status: status.label().to_string(),
                candidates: match status {
                    SourceStatus::Succeeded { candidates } => *candidates,
                    _ => 0,
                },
                reason: match status {
                    SourceStatus::FailedAfterRetries { reason, .. } => Some(reason.to_string()),
                    _ => None,
                },
            })
            .collect();

        let records: Vec<RecordSummary> = self
            .records
            .iter()
            .map(|r| RecordSummary {
                canonical_id: r.canonical_id.clone(),
                title: r.title.clone(),
                year: r.year,
                source_ids: r.source_ids.clone(),
                status: r.enrichment_status.label().to_string(),
            })
            .collect();

        let enriched = self
            .records
            .iter()
            .filter(|r| r.enrichment_status == EnrichmentStatus::Enriched)
            .count();
        let enrichment_failed = self
            .records
            .iter()
            .filter(|r| matches!(r.enrichment_status, EnrichmentStatus::EnrichmentFailed { .. }))
            .count();

        RunReport {
            run_id: self.run_id.clone(),
            query: self.query.text.clone(),
            stage: self.stage,
            failure: self.failure.clone(),
            sources,
            records,
            enriched,
            enrichment_failed,
            upserted: self.upserted,
        }
    }
}

/// Per-source line of a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub status: String,
    pub candidates: usize,
    pub reason: Option<String>,
}

/// Per-record line of a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    pub canonical_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub source_ids: Vec<String>,
    pub status: String,
}

/// User-visible result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub query: String,
    pub stage: Stage,
    pub failure: Option<String>,
    pub sources: Vec<SourceSummary>,
    pub records: Vec<RecordSummary>,
    pub enriched: usize,
    pub enrichment_failed: usize,
    pub upserted: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress_names_the_pending_stage() {
        assert_eq!(Stage::Init.progress(), "not started, next: searching");
        assert_eq!(Stage::Searching.progress(), "searching complete, next: merging");
        assert_eq!(Stage::Enriching.progress(), "enriching complete, next: sinking");
        assert_eq!(Stage::Done.progress(), "done");
        assert_eq!(Stage::Failed.progress(), "failed");
        assert_eq!(Stage::Sinking.next(), Some(Stage::Done));
        assert_eq!(Stage::Failed.next(), None);
    }

    #[test]
    fn test_pending_and_processed_stay_disjoint() {
        let mut state = RunState::new("run", Query::new("q"));
        state.mark_pending(["a", "b", "c"]);
        state.mark_processed("a");
        // Re-queueing a processed id must not move it back
        state.mark_pending(["a", "d"]);

        assert!(state.processed.contains("a"));
        assert!(!state.pending.contains("a"));
        assert!(state.processed.is_disjoint(&state.pending));

        let union: BTreeSet<_> = state.processed.union(&state.pending).cloned().collect();
        assert_eq!(union.len(), 4);
    }

    #[test]
    fn test_generate_id_shape() {
        let id = RunState::generate_id(&Query::new("graph neural networks"));
        let (stamp, hash) = id.split_once('-').unwrap();
        assert_eq!(stamp.len(), 15);
        assert_eq!(hash.len(), 8);
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let mut state = RunState::new("run-1", Query::new("rag").max_results(5));
        state.sources.insert(
            "arxiv".into(),
            SourceStatus::FailedAfterRetries {
                reason: FailureReason::RateLimit { retry_after: None },
                retryable: true,
            },
        );
        state.advance(Stage::Searching);

        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage, Stage::Searching);
        assert_eq!(back.query.max_results, 5);
        assert_eq!(back.sources["arxiv"].label(), "FailedAfterRetries");
        assert_eq!(back.report().sources[0].reason.as_deref(), Some("Rate limit exceeded"));
    }
}
