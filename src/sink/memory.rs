//! In-memory sink.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::Sink;
use crate::models::{CanonicalRecord, FailureReason, Outcome};

/// Keeps upserted records in a map keyed by canonical id.
///
/// Scripted failures are returned by the next upsert calls, in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, CanonicalRecord>>,
    failures: Mutex<VecDeque<FailureReason>>,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next upsert with `reason`
    pub fn push_failure(&self, reason: FailureReason) {
        lock(&self.failures).push_back(reason);
    }

    /// Stored records, ordered by canonical id
    pub fn records(&self) -> Vec<CanonicalRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn get(&self, canonical_id: &str) -> Option<CanonicalRecord> {
        lock(&self.records).get(canonical_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upsert calls, including failed ones
    pub fn upsert_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, records: &[CanonicalRecord]) -> Outcome<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failure = lock(&self.failures).pop_front();
        if let Some(reason) = failure {
            return Outcome::failure(reason);
        }

        let mut stored = lock(&self.records);
        for record in records {
            stored.insert(record.canonical_id.clone(), record.clone());
        }
        Outcome::Success(records.len())
    }
}
