//! Mock language model for testing purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::LanguageModel;
use crate::models::{FailureReason, Outcome};

/// A scripted model.
///
/// Answers "Analysis of <title>" plus a keyword line by default, fails for
/// configured titles, and records how many calls were in flight at once.
#[derive(Debug, Default)]
pub struct MockModel {
    failures: Mutex<HashMap<String, FailureReason>>,
    delay: Mutex<Option<Duration>>,
    hang: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every prompt for `title` with `reason`
    pub fn fail_on(self, title: impl Into<String>, reason: FailureReason) -> Self {
        lock(&self.failures).insert(title.into(), reason);
        self
    }

    /// Sleep before answering
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.delay) = Some(delay);
        self
    }

    /// Never answer until `set_hang(false)`
    pub fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Number of generate calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent generate calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, prompt: &str) -> Outcome<String> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        while self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let title = prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix("Title: "))
            .unwrap_or("untitled")
            .to_string();

        let failure = lock(&self.failures).get(&title).cloned();
        if let Some(reason) = failure {
            return Outcome::failure(reason);
        }

        Outcome::Success(format!(
            "Analysis of {}.\nKeywords: mock, {}",
            title,
            title.to_lowercase()
        ))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decrements the in-flight counter when a call ends, including on cancellation
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Outcome<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.respond(prompt).await
    }
}
