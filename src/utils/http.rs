//! HTTP client utilities.

use reqwest::{Client, RequestBuilder, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::FailureReason;
use crate::utils::identity::{Identity, IdentityPool};

/// Shared HTTP client with one connection pool per proxy in the identity pool.
///
/// The user agent is set per request from the [`Identity`]; the proxy picks
/// the prebuilt client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    direct: Arc<Client>,
    proxied: Arc<HashMap<String, Client>>,
}

impl HttpClient {
    /// Create clients for a direct connection and every proxy in `pool`.
    pub fn new(pool: &IdentityPool) -> Result<Self, FailureReason> {
        let mut proxied = HashMap::new();
        for proxy in pool.proxies() {
            let proxy_config = reqwest::Proxy::all(proxy)
                .map_err(|e| FailureReason::InvalidRequest(format!("proxy {}: {}", proxy, e)))?;
            let client = base_builder()
                .proxy(proxy_config)
                .build()
                .map_err(|e| FailureReason::InvalidRequest(e.to_string()))?;
            proxied.insert(proxy.to_string(), client);
        }

        let direct = base_builder()
            .build()
            .map_err(|e| FailureReason::InvalidRequest(e.to_string()))?;

        Ok(Self {
            direct: Arc::new(direct),
            proxied: Arc::new(proxied),
        })
    }

    /// Client without any proxy
    pub fn direct() -> Result<Self, FailureReason> {
        Self::new(&IdentityPool::new(Vec::new()))
    }

    /// Client for the identity's proxy; unknown proxies fall back to direct
    pub fn client_for(&self, identity: &Identity) -> &Client {
        identity
            .proxy
            .as_deref()
            .and_then(|proxy| self.proxied.get(proxy))
            .unwrap_or(&*self.direct)
    }

    /// GET with the identity's user agent
    pub fn get(&self, url: &str, identity: &Identity) -> RequestBuilder {
        self.client_for(identity)
            .get(url)
            .header(reqwest::header::USER_AGENT, &identity.user_agent)
    }

    /// The direct client, for calls that never rotate identities
    pub fn client(&self) -> &Client {
        &self.direct
    }
}

fn base_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
}

/// Seconds from a `Retry-After` header (delta-seconds form only)
pub fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read the body of a successful response, classifying failures.
pub async fn checked_text(response: Response) -> Result<String, FailureReason> {
    let status = response.status();
    if !status.is_success() {
        let hint = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        return Err(FailureReason::from_status(status, hint, &body));
    }

    response.text().await.map_err(FailureReason::from)
}
