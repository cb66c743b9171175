//! Per-source request pacing.

use nonzero_ext::nonzero;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter as Governor};

type DirectRateLimiter = Governor<NotKeyed, InMemoryState, DefaultClock>;

/// Paces outgoing requests of one source. Clones share the same budget.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limited", &self.is_limited())
            .finish()
    }
}

impl RateLimiter {
    /// At most `requests_per_second` requests, no burst. Zero or negative
    /// rates disable pacing.
    pub fn per_second(requests_per_second: f64) -> Self {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Self::unlimited();
        }

        let period = Duration::from_secs_f64((1.0 / requests_per_second).max(0.001));
        let limiter = Quota::with_period(period)
            .map(|quota| quota.allow_burst(nonzero!(1u32)))
            .map(|quota| Arc::new(Governor::direct(quota)));

        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until the next request may go out.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }
}
