//! Language-model enrichment of canonical records.
//!
//! The [`EnrichmentScheduler`] runs one model call per record with at most
//! `concurrency_limit` calls in flight. Each call goes through the shared
//! [`Resilience`] wrapper with the enrichment retry policy; a record whose
//! call fails terminally is still returned, marked `EnrichmentFailed`.

mod llm;
pub mod mock;
mod prompt;

pub use llm::{LanguageModel, OllamaModel};
pub use mock::MockModel;
pub use prompt::{analysis_prompt, parse_enrichment, MAX_KEYWORDS};

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

use crate::models::{CanonicalRecord, Outcome};
use crate::utils::{Resilience, RetryPolicy};

/// Default completion budget per record
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Bounded-concurrency enrichment through a [`LanguageModel`]
#[derive(Debug, Clone)]
pub struct EnrichmentScheduler {
    model: Arc<dyn LanguageModel>,
    resilience: Resilience,
    policy: RetryPolicy,
    max_tokens: u32,
    temperature: f32,
}

impl EnrichmentScheduler {
    pub fn new(model: Arc<dyn LanguageModel>, resilience: Resilience, policy: RetryPolicy) -> Self {
        Self {
            model,
            resilience,
            policy,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Override the generation parameters
    pub fn with_generation(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Enrich every record, one outcome per input record, in input order.
    ///
    /// A successful outcome carries the record marked `Enriched`; a failed
    /// outcome carries the reason the record could not be enriched.
    pub async fn enrich(
        &self,
        records: Vec<CanonicalRecord>,
        concurrency_limit: usize,
    ) -> Vec<Outcome<CanonicalRecord>> {
        let limit = concurrency_limit.max(1);
        tracing::info!(
            "Enriching {} records with {} (concurrency {})",
            records.len(),
            self.model.name(),
            limit
        );

        stream::iter(records.into_iter().map(|record| self.enrich_one(record)))
            .buffered(limit)
            .collect()
            .await
    }

    /// Enrich every record and settle its status.
    ///
    /// Unlike [`enrich`](Self::enrich) nothing is dropped: records whose call
    /// failed come back marked `EnrichmentFailed`.
    pub async fn enrich_records(
        &self,
        records: Vec<CanonicalRecord>,
        concurrency_limit: usize,
    ) -> Vec<CanonicalRecord> {
        let originals = records.clone();
        let outcomes = self.enrich(records, concurrency_limit).await;

        let settled: Vec<CanonicalRecord> = originals
            .into_iter()
            .zip(outcomes)
            .map(|(mut original, outcome)| match outcome {
                Outcome::Success(enriched) => enriched,
                Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => {
                    original.mark_enrichment_failed(reason.to_string());
                    original
                }
            })
            .collect();

        let failed = settled.iter().filter(|r| !r.is_enriched()).count();
        if failed > 0 {
            tracing::warn!("{} of {} records could not be enriched", failed, settled.len());
        }

        settled
    }

    async fn enrich_one(&self, mut record: CanonicalRecord) -> Outcome<CanonicalRecord> {
        let prompt = prompt::analysis_prompt(&record);
        let label = format!("enrich:{}", record.canonical_id);
        let model = &self.model;
        let prompt = prompt.as_str();

        let outcome = self
            .resilience
            .execute(&label, &self.policy, |_identity| async move {
                match model.generate(prompt, self.max_tokens, self.temperature).await {
                    Outcome::Success(text) => Outcome::from(prompt::parse_enrichment(&text)),
                    Outcome::RetryableFailure(reason) => Outcome::RetryableFailure(reason),
                    Outcome::FatalFailure(reason) => Outcome::FatalFailure(reason),
                }
            })
            .await;

        outcome.map(|enrichment| {
            record.mark_enriched(enrichment);
            record
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichmentStatus, FailureReason};
    use crate::utils::IdentityPool;
    use std::time::Duration;

    fn record(n: usize) -> CanonicalRecord {
        CanonicalRecord {
            canonical_id: format!("id-{}", n),
            title: format!("Paper {}", n),
            authors: vec!["Ada Lovelace".into()],
            r#abstract: "An abstract.".into(),
            year: Some(2020),
            venue: None,
            url: None,
            doi: None,
            source_ids: vec!["arxiv".into()],
            enrichment_status: EnrichmentStatus::Pending,
            enrichment: None,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.0,
            timeout_per_attempt: Duration::from_secs(5),
            identity_rotation: false,
        }
    }

    fn scheduler(model: Arc<MockModel>) -> EnrichmentScheduler {
        EnrichmentScheduler::new(
            model,
            Resilience::new(Arc::new(IdentityPool::default())),
            policy(),
        )
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let model = Arc::new(MockModel::new().with_delay(Duration::from_millis(20)));
        let records: Vec<_> = (0..12).map(record).collect();

        let outcomes = scheduler(model.clone()).enrich(records, 3).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(model.max_in_flight() <= 3);
        assert!(model.max_in_flight() >= 2, "calls should overlap");
        assert_eq!(model.calls(), 12);
    }

    #[tokio::test]
    async fn test_outcomes_keep_input_order() {
        let model = Arc::new(MockModel::new());
        let records: Vec<_> = (0..5).map(record).collect();

        let outcomes = scheduler(model).enrich(records, 4).await;
        let ids: Vec<_> = outcomes
            .into_iter()
            .map(|o| o.success().unwrap().canonical_id)
            .collect();
        assert_eq!(ids, vec!["id-0", "id-1", "id-2", "id-3", "id-4"]);
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let model = Arc::new(
            MockModel::new().fail_on("Paper 4", FailureReason::Network("connection reset".into())),
        );
        let records: Vec<_> = (0..10).map(record).collect();

        let settled = scheduler(model.clone()).enrich_records(records, 4).await;

        assert_eq!(settled.len(), 10);
        assert_eq!(settled.iter().filter(|r| r.is_enriched()).count(), 9);
        assert!(matches!(
            settled[4].enrichment_status,
            EnrichmentStatus::EnrichmentFailed { .. }
        ));
        assert!(settled[4].enrichment.is_none());
        // Nine successes plus two attempts for the failing record
        assert_eq!(model.calls(), 11);

        let enrichment = settled[0].enrichment.as_ref().unwrap();
        assert_eq!(enrichment.analysis, "Analysis of Paper 0.");
        assert_eq!(enrichment.keywords, vec!["mock", "paper 0"]);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let model = Arc::new(
            MockModel::new().fail_on("Paper 0", FailureReason::InvalidRequest("bad model".into())),
        );

        let settled = scheduler(model.clone()).enrich_records(vec![record(0)], 1).await;
        assert!(!settled[0].is_enriched());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_limit_is_treated_as_one() {
        let model = Arc::new(MockModel::new());
        let outcomes = scheduler(model.clone()).enrich(vec![record(0), record(1)], 0).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(model.max_in_flight(), 1);
    }
}
