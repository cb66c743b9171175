//! Outbound identity rotation (user agent + optional proxy).
//!
//! One [`IdentityPool`] is shared by every resilience wrapper in the process.
//! The cursor is a single atomic counter, so two concurrent callers never get
//! the same slot from the same increment, and exhaustion simply wraps around.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Desktop browser user agents rotated when no pool is configured.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/91.0.864.48 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
];

/// One outbound network identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_agent: String,
    /// Proxy URL (`http://`, `https://` or `socks5://`), None for a direct connection
    pub proxy: Option<String>,
}

impl Identity {
    pub fn direct(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            proxy: None,
        }
    }
}

/// Round-robin pool of identities with a synchronized cursor.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Identity>,
    cursor: AtomicUsize,
}

impl IdentityPool {
    /// Create a pool from explicit identities. An empty list falls back to
    /// the crate's own user agent on a direct connection.
    pub fn new(identities: Vec<Identity>) -> Self {
        let identities = if identities.is_empty() {
            vec![Identity::direct(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))]
        } else {
            identities
        };

        Self {
            identities,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pair user agents with proxies, cycling the shorter list.
    pub fn from_parts(user_agents: &[String], proxies: &[String]) -> Self {
        let agents: Vec<String> = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            user_agents.to_vec()
        };

        let slots = agents.len().max(proxies.len());
        let identities = (0..slots)
            .map(|i| Identity {
                user_agent: agents[i % agents.len()].clone(),
                proxy: if proxies.is_empty() {
                    None
                } else {
                    Some(proxies[i % proxies.len()].clone())
                },
            })
            .collect();

        Self::new(identities)
    }

    /// Hand out the next identity and advance the cursor.
    pub fn next(&self) -> Identity {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.identities[slot % self.identities.len()].clone()
    }

    /// The first identity, used when rotation is disabled.
    pub fn primary(&self) -> Identity {
        self.identities[0].clone()
    }

    /// How many identities have been handed out so far.
    pub fn issued(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Distinct proxies referenced by the pool.
    pub fn proxies(&self) -> BTreeSet<&str> {
        self.identities
            .iter()
            .filter_map(|i| i.proxy.as_deref())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::from_parts(&[], &[])
    }
}
