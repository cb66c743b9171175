//! Resilience wrapper: retries with exponential backoff, jitter, a
//! per-attempt timeout and identity rotation.
//!
//! Every adapter, model and sink call goes through [`Resilience::execute`].
//! The wrapper never retries a [`Outcome::FatalFailure`] and never makes more
//! than `max_attempts` calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::models::{FailureReason, Outcome};
use crate::utils::identity::{Identity, IdentityPool};

/// Retry behavior for one class of calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay, hints included
    pub max_delay: Duration,
    /// Uniform jitter as a fraction of the delay (0.25 = ±25%)
    pub jitter_fraction: f64,
    /// Time budget of a single attempt
    pub timeout_per_attempt: Duration,
    /// Take a fresh identity after each retryable failure
    pub identity_rotation: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::search()
    }
}

impl RetryPolicy {
    /// Policy for source adapters: public endpoints that rate-limit aggressively
    pub fn search() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.25,
            timeout_per_attempt: Duration::from_secs(30),
            identity_rotation: true,
        }
    }

    /// Policy for language model calls: slow but local, no identity involved
    pub fn enrichment() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.1,
            timeout_per_attempt: Duration::from_secs(120),
            identity_rotation: false,
        }
    }

    /// Policy for sink writes
    pub fn sink() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
            timeout_per_attempt: Duration::from_secs(60),
            identity_rotation: false,
        }
    }

    /// Un-jittered delay after the given failed attempt (1-based):
    /// `min(max_delay, base_delay * 2^(attempt-1))`, raised to a
    /// `Retry-After` hint but never above `max_delay`.
    pub fn backoff_delay(&self, attempt: u32, reason: &FailureReason) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let exp = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        match reason {
            FailureReason::RateLimit {
                retry_after: Some(secs),
            } => exp.max(Duration::from_secs(*secs)).min(self.max_delay),
            _ => exp,
        }
    }

    /// Apply uniform jitter in `[delay * (1 - j), delay * (1 + j)]`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let j = self.jitter_fraction.clamp(0.0, 1.0);
        if j == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + j * (2.0 * fastrand::f64() - 1.0);
        delay.mul_f64(factor)
    }
}

/// Retry executor sharing one identity pool
#[derive(Debug, Clone)]
pub struct Resilience {
    identities: Arc<IdentityPool>,
}

impl Resilience {
    pub fn new(identities: Arc<IdentityPool>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &IdentityPool {
        &self.identities
    }

    fn identity_for(&self, policy: &RetryPolicy) -> Identity {
        if policy.identity_rotation {
            self.identities.next()
        } else {
            self.identities.primary()
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// Each attempt receives the identity to use and is cut off after
    /// `timeout_per_attempt`, which counts as a retryable failure. When the
    /// attempts are exhausted the last retryable failure is returned as is.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Outcome<T>
    where
        F: FnMut(Identity) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut identity = self.identity_for(policy);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match timeout(policy.timeout_per_attempt, operation(identity.clone())).await
            {
                Ok(outcome) => outcome,
                Err(_) => Outcome::RetryableFailure(FailureReason::Timeout {
                    millis: policy.timeout_per_attempt.as_millis() as u64,
                }),
            };

            match outcome {
                Outcome::Success(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            "{}: succeeded on attempt {} after {} transient failures",
                            label,
                            attempt,
                            attempt - 1
                        );
                    }
                    return Outcome::Success(value);
                }
                Outcome::FatalFailure(reason) => {
                    tracing::warn!("{}: permanent failure on attempt {}: {}", label, attempt, reason);
                    return Outcome::FatalFailure(reason);
                }
                Outcome::RetryableFailure(reason) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            "{}: giving up after {} attempts: {}",
                            label,
                            attempt,
                            reason
                        );
                        return Outcome::RetryableFailure(reason);
                    }

                    let delay = policy.jittered(policy.backoff_delay(attempt, &reason));
                    if policy.identity_rotation {
                        identity = self.identities.next();
                    }

                    tracing::debug!(
                        "{}: transient failure on attempt {}/{} ({}), retrying in {:?}",
                        label,
                        attempt,
                        max_attempts,
                        reason,
                        delay
                    );

                    sleep(delay).await;
                }
            }
        }
    }
}
