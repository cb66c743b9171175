//! Pipeline orchestration.
//!
//! A run moves through `Init → Searching → Merging → Enriching → Sinking →
//! Done`. The persisted [`RunState`] always names the last stage whose output
//! is complete, and it is checkpointed after every transition, so
//! [`Pipeline::resume`] continues with the first unfinished stage. A search
//! stage in which no source succeeds ends the run in `Failed`. Before the
//! search checkpoint is written, snippet-only abstracts are completed by the
//! optional [`AbstractBackfill`].

mod cancel;
mod state;

pub use cancel::CancellationToken;
pub use state::{FileStateStore, MemoryStateStore, StateError, StateStore};

use futures_util::future::join_all;
use std::sync::Arc;

use crate::config::Config;
use crate::enrich::{EnrichmentScheduler, OllamaModel};
use crate::models::{FailureReason, Outcome, Query, RunReport, RunState, SourceStatus, Stage};
use crate::sink::{sink_from_config, Sink};
use crate::sources::{resilient_search, AbstractBackfill, SourceRegistry};
use crate::utils::{HttpClient, IdentityPool, Merger, RateLimiter, Resilience, RetryPolicy};

/// Default number of concurrent enrichment calls
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Errors that stop a run before it reaches a terminal stage.
///
/// The checkpoint written before the error stays valid, so every variant
/// except `Setup` and `UnknownRun` leaves a resumable run behind.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline setup failed: {0}")]
    Setup(FailureReason),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("sink failed: {0}")]
    Sink(FailureReason),

    #[error("run {run_id} cancelled after stage '{stage}'")]
    Cancelled { run_id: String, stage: Stage },

    #[error("unknown run '{0}'")]
    UnknownRun(String),
}

/// The orchestrator: sources, merger, enrichment and sink behind one state
/// machine.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: SourceRegistry,
    resilience: Resilience,
    search_policy: RetryPolicy,
    sink_policy: RetryPolicy,
    backfill: Option<AbstractBackfill>,
    merger: Merger,
    scheduler: EnrichmentScheduler,
    concurrency: usize,
    sink: Arc<dyn Sink>,
    store: Arc<dyn StateStore>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        registry: SourceRegistry,
        scheduler: EnrichmentScheduler,
        sink: Arc<dyn Sink>,
        store: Arc<dyn StateStore>,
        resilience: Resilience,
    ) -> Self {
        Self {
            registry,
            resilience,
            search_policy: RetryPolicy::search(),
            sink_policy: RetryPolicy::sink(),
            backfill: None,
            merger: Merger::default(),
            scheduler,
            concurrency: DEFAULT_CONCURRENCY,
            sink,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire every component from configuration
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let pool = Arc::new(IdentityPool::from_parts(
            &config.identity.user_agents,
            &config.identity.proxies,
        ));
        let client = HttpClient::new(&pool).map_err(PipelineError::Setup)?;
        let resilience = Resilience::new(pool);

        let registry = SourceRegistry::from_config(config, &client);
        let search_policy = config.retry.search.to_policy(config.identity.rotation);

        let backfill = config.backfill.enabled.then(|| {
            let mut backfill = AbstractBackfill::new(resilience.clone(), search_policy.clone());
            // Reuse the registered arXiv source so lookups share its rate limiter
            let arxiv = registry
                .get("arxiv")
                .cloned()
                .or_else(|| SourceRegistry::build_source("arxiv", config, &client));
            if let Some(arxiv) = arxiv {
                backfill = backfill.with_arxiv(arxiv);
            }
            if config.backfill.landing_pages {
                backfill = backfill.with_landing_pages(
                    client.clone(),
                    RateLimiter::per_second(config.backfill.requests_per_second),
                );
            }
            backfill
        });

        let model = OllamaModel::new(
            client.client().clone(),
            &config.model.base_url,
            &config.model.name,
        );
        let scheduler = EnrichmentScheduler::new(
            Arc::new(model),
            resilience.clone(),
            config.retry.enrichment.to_policy(false),
        )
        .with_generation(config.model.max_tokens, config.model.temperature);

        let sink = sink_from_config(config).map_err(PipelineError::Setup)?;
        let store = Arc::new(FileStateStore::new(config.state_dir()));

        let mut pipeline = Self::new(registry, scheduler, sink, store, resilience)
            .with_search_policy(search_policy)
            .with_sink_policy(config.retry.sink.to_policy(false))
            .with_merger(Merger::new(config.merge.similarity_threshold))
            .with_concurrency(config.enrichment.concurrency);
        if let Some(backfill) = backfill {
            pipeline = pipeline.with_backfill(backfill);
        }
        Ok(pipeline)
    }

    pub fn with_search_policy(mut self, policy: RetryPolicy) -> Self {
        self.search_policy = policy;
        self
    }

    pub fn with_sink_policy(mut self, policy: RetryPolicy) -> Self {
        self.sink_policy = policy;
        self
    }

    /// Complete snippet-only abstracts before the search stage is checkpointed
    pub fn with_backfill(mut self, backfill: AbstractBackfill) -> Self {
        self.backfill = Some(backfill);
        self
    }

    pub fn with_merger(mut self, merger: Merger) -> Self {
        self.merger = merger;
        self
    }

    /// Maximum concurrent enrichment calls (at least one)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Share an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Start a new run
    pub async fn run(&self, query: Query) -> Result<RunReport, PipelineError> {
        let state = RunState::new(RunState::generate_id(&query), query);
        tracing::info!("Starting run {} for '{}'", state.run_id, state.query.text);
        self.store.save(&state).await?;
        self.drive(state).await
    }

    /// Continue a checkpointed run from its first unfinished stage.
    ///
    /// Finished runs return their report unchanged.
    pub async fn resume(&self, run_id: &str) -> Result<RunReport, PipelineError> {
        let state = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;

        if state.stage.is_terminal() {
            tracing::info!("Run {} already finished ({})", run_id, state.stage);
        } else {
            tracing::info!("Resuming run {} after stage '{}'", run_id, state.stage);
        }
        self.drive(state).await
    }

    /// Report of a checkpointed run without executing anything
    pub async fn status(&self, run_id: &str) -> Result<RunReport, PipelineError> {
        self.store
            .load(run_id)
            .await?
            .map(|state| state.report())
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))
    }

    async fn drive(&self, mut state: RunState) -> Result<RunReport, PipelineError> {
        while !state.stage.is_terminal() {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(&state));
            }

            match state.stage {
                Stage::Init => self.search(&mut state).await?,
                Stage::Searching => self.merge(&mut state),
                Stage::Merging => self.enrich(&mut state).await?,
                Stage::Enriching => self.deliver(&mut state).await?,
                Stage::Sinking => state.advance(Stage::Done),
                Stage::Done | Stage::Failed => {}
            }

            self.store.save(&state).await?;
            tracing::info!("Run {}: stage '{}' complete", state.run_id, state.stage);
        }

        Ok(state.report())
    }

    fn cancelled(&self, state: &RunState) -> PipelineError {
        tracing::warn!(
            "Run {} cancelled; checkpoint kept at stage '{}'",
            state.run_id,
            state.stage
        );
        PipelineError::Cancelled {
            run_id: state.run_id.clone(),
            stage: state.stage,
        }
    }

    /// Fan out to every applicable source at once
    async fn search(&self, state: &mut RunState) -> Result<(), PipelineError> {
        let sources = self.registry.applicable(&state.query);
        if sources.is_empty() {
            state.failure = Some("no configured source matches the query".to_string());
            state.advance(Stage::Failed);
            return Ok(());
        }

        for source in &sources {
            state
                .sources
                .insert(source.id().to_string(), SourceStatus::Pending);
        }

        let query = &state.query;
        let searches = sources.iter().map(|source| async move {
            let outcome =
                resilient_search(source.as_ref(), query, &self.resilience, &self.search_policy)
                    .await;
            (source.id().to_string(), outcome)
        });

        let results = tokio::select! {
            results = join_all(searches) => results,
            _ = self.cancel.cancelled() => return Err(self.cancelled(state)),
        };

        // join_all keeps registry order, so candidate order is deterministic
        let mut collected = Vec::new();
        for (source_id, outcome) in results {
            let status = match outcome {
                Outcome::Success(candidates) => {
                    tracing::info!("{}: {} candidates", source_id, candidates.len());
                    let status = SourceStatus::Succeeded {
                        candidates: candidates.len(),
                    };
                    collected.extend(candidates);
                    status
                }
                Outcome::RetryableFailure(reason) => SourceStatus::FailedAfterRetries {
                    reason,
                    retryable: true,
                },
                Outcome::FatalFailure(reason) => SourceStatus::FailedAfterRetries {
                    reason,
                    retryable: false,
                },
            };
            state.sources.insert(source_id, status);
        }

        if let Some(backfill) = &self.backfill {
            collected = tokio::select! {
                filled = backfill.fill(collected) => filled,
                _ = self.cancel.cancelled() => return Err(self.cancelled(state)),
            };
        }
        state.candidates.extend(collected);

        if state.successful_sources() == 0 {
            tracing::warn!("Run {}: every source failed", state.run_id);
            state.failure = Some(format!("all {} sources failed", sources.len()));
            state.advance(Stage::Failed);
        } else {
            state.advance(Stage::Searching);
        }
        Ok(())
    }

    fn merge(&self, state: &mut RunState) {
        let records = self.merger.merge(&state.candidates);
        tracing::info!(
            "Merged {} candidates into {} records",
            state.candidates.len(),
            records.len()
        );

        state.records = records;
        let ids: Vec<String> = state
            .records
            .iter()
            .map(|r| r.canonical_id.clone())
            .collect();
        state.mark_pending(ids.iter().map(String::as_str));
        state.advance(Stage::Merging);
    }

    /// Enrich every record that is still pending
    async fn enrich(&self, state: &mut RunState) -> Result<(), PipelineError> {
        let batch: Vec<_> = state
            .records
            .iter()
            .filter(|r| state.pending.contains(&r.canonical_id))
            .cloned()
            .collect();

        let settled = tokio::select! {
            settled = self.scheduler.enrich_records(batch, self.concurrency) => settled,
            _ = self.cancel.cancelled() => return Err(self.cancelled(state)),
        };

        for record in settled {
            state.mark_processed(&record.canonical_id);
            if let Some(slot) = state
                .records
                .iter_mut()
                .find(|r| r.canonical_id == record.canonical_id)
            {
                *slot = record;
            }
        }

        state.advance(Stage::Enriching);
        Ok(())
    }

    /// Hand every record, enriched or not, to the sink
    async fn deliver(&self, state: &mut RunState) -> Result<(), PipelineError> {
        let label = format!("sink:{}", self.sink.name());
        let records = &state.records;
        let sink = &self.sink;

        let outcome = tokio::select! {
            outcome = self.resilience.execute(&label, &self.sink_policy, |_identity| async move {
                sink.upsert(records).await
            }) => outcome,
            _ = self.cancel.cancelled() => return Err(self.cancelled(state)),
        };

        match outcome {
            Outcome::Success(written) => {
                tracing::info!("{} accepted {} records", self.sink.name(), written);
                state.upserted = Some(written);
                state.advance(Stage::Sinking);
                Ok(())
            }
            Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => {
                tracing::warn!("Run {}: sink failed: {}", state.run_id, reason);
                Err(PipelineError::Sink(reason))
            }
        }
    }
}
