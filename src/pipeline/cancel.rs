//! Cooperative cancellation for pipeline runs
//!
//! The caller signals via a cancellation token. The orchestrator checks it
//! between stages and races in-flight stage work against it. Checkpoints
//! already written remain valid.

use std::sync::Arc;
use tokio::sync::watch;

/// A cooperative cancellation token.
///
/// Clones share state. Cancellation is one-way.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as self, so the channel cannot close here
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
