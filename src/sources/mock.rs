//! Mock source for testing purposes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{FailureReason, Outcome, Query, RawCandidate};
use crate::sources::Source;
use crate::utils::Identity;

/// A mock source that replays scripted outcomes.
///
/// Scripted outcomes are consumed in order; once the script is empty every
/// call returns the fallback (an empty success unless configured otherwise).
#[derive(Debug)]
pub struct MockSource {
    id: String,
    script: Mutex<VecDeque<Outcome<Vec<RawCandidate>>>>,
    fallback: Mutex<Outcome<Vec<RawCandidate>>>,
    calls: AtomicUsize,
    identities: Mutex<Vec<Identity>>,
    delay: Mutex<Option<Duration>>,
    catalog: Mutex<Vec<RawCandidate>>,
    lookups: Mutex<Vec<Vec<String>>>,
}

impl MockSource {
    /// Create a new mock source with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Outcome::Success(Vec::new())),
            calls: AtomicUsize::new(0),
            identities: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            catalog: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// A source that always returns these candidates.
    pub fn returning(id: impl Into<String>, candidates: Vec<RawCandidate>) -> Self {
        let source = Self::new(id);
        source.set_fallback(Outcome::Success(candidates));
        source
    }

    /// A source that always fails with the given reason.
    pub fn failing(id: impl Into<String>, reason: FailureReason) -> Self {
        let source = Self::new(id);
        source.set_fallback(Outcome::failure(reason));
        source
    }

    /// Queue an outcome for the next unscripted call.
    pub fn push_outcome(&self, outcome: Outcome<Vec<RawCandidate>>) {
        lock(&self.script).push_back(outcome);
    }

    /// Set the outcome returned once the script is exhausted.
    pub fn set_fallback(&self, outcome: Outcome<Vec<RawCandidate>>) {
        *lock(&self.fallback) = outcome;
    }

    /// Sleep this long inside every search call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Records served by [`Source::lookup`], matched on `external_id`.
    pub fn with_catalog(self, records: Vec<RawCandidate>) -> Self {
        *lock(&self.catalog) = records;
        self
    }

    /// Id lists received by lookup calls, in call order.
    pub fn lookups(&self) -> Vec<Vec<String>> {
        lock(&self.lookups).clone()
    }

    /// Number of search calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Identities used by each call, in call order.
    pub fn identities(&self) -> Vec<Identity> {
        lock(&self.identities).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    async fn search(&self, _query: &Query, identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.identities).push(identity.clone());

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => lock(&self.fallback).clone(),
        }
    }

    async fn lookup(&self, external_ids: &[String], _identity: &Identity) -> Outcome<Vec<RawCandidate>> {
        lock(&self.lookups).push(external_ids.to_vec());
        let found = lock(&self.catalog)
            .iter()
            .filter(|c| external_ids.contains(&c.external_id))
            .cloned()
            .collect();
        Outcome::Success(found)
    }
}

/// Helper function to create a candidate for testing.
pub fn make_candidate(source_id: &str, external_id: &str, title: &str) -> RawCandidate {
    RawCandidate::builder(source_id, external_id, title)
        .url(format!("http://example.com/{}", external_id))
        .build()
}
