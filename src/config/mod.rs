//! Configuration management.
//!
//! Settings come from an optional TOML file layered under environment
//! variables prefixed with `SCHOLAR_HARVEST`, using `__` between nested keys
//! (`SCHOLAR_HARVEST__SEARCH__MAX_RESULTS=20`). See [`file_config`] for the
//! file format.

pub mod file_config;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{RetryPolicy, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_USER_AGENTS};

pub use config::ConfigError;
pub use file_config::{save_config, ConfigFileError};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SCHOLAR_HARVEST";

/// File name searched for in the working directory
pub const LOCAL_CONFIG_FILE: &str = "scholar-harvest.toml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    /// Completion of snippet-only abstracts after search
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Retry policies per call class
    #[serde(default)]
    pub retry: RetryConfig,

    /// Outbound identity pool
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Language model used for enrichment
    #[serde(default)]
    pub model: ModelConfig,

    /// Where canonical records are written
    #[serde(default)]
    pub sink: SinkConfig,

    /// Where run checkpoints are kept
    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-source rate limits
    #[serde(default)]
    pub source_rates: Vec<SourceRateConfig>,
}

impl Config {
    /// Requests per second configured for a source, if any
    pub fn rate_for(&self, source: &str) -> Option<f64> {
        self.source_rates
            .iter()
            .find(|r| r.source == source)
            .map(|r| r.requests_per_second)
    }

    /// Directory holding run checkpoints
    pub fn state_dir(&self) -> PathBuf {
        self.state
            .directory
            .clone()
            .unwrap_or_else(default_state_dir)
    }
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Source ids to register, in query order
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Default per-source result limit
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            max_results: default_max_results(),
        }
    }
}

fn default_sources() -> Vec<String> {
    vec!["arxiv".to_string(), "semantic".to_string()]
}

fn default_max_results() -> usize {
    10
}

/// Retry policies for sources, the language model and the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "PolicyConfig::search")]
    pub search: PolicyConfig,

    #[serde(default = "PolicyConfig::enrichment")]
    pub enrichment: PolicyConfig,

    #[serde(default = "PolicyConfig::sink")]
    pub sink: PolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            search: PolicyConfig::search(),
            enrichment: PolicyConfig::enrichment(),
            sink: PolicyConfig::sink(),
        }
    }
}

/// Serialized form of a [`RetryPolicy`]. Missing fields take the search
/// policy defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
    pub timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::search()
    }
}

impl From<&RetryPolicy> for PolicyConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_fraction: policy.jitter_fraction,
            timeout_secs: policy.timeout_per_attempt.as_secs(),
        }
    }
}

impl PolicyConfig {
    pub fn search() -> Self {
        Self::from(&RetryPolicy::search())
    }

    pub fn enrichment() -> Self {
        Self::from(&RetryPolicy::enrichment())
    }

    pub fn sink() -> Self {
        Self::from(&RetryPolicy::sink())
    }

    /// Build the runtime policy
    pub fn to_policy(&self, identity_rotation: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            jitter_fraction: self.jitter_fraction.clamp(0.0, 1.0),
            timeout_per_attempt: Duration::from_secs(self.timeout_secs.max(1)),
            identity_rotation,
        }
    }
}

/// Outbound identities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Rotate to a fresh identity after each retryable failure
    #[serde(default = "default_true")]
    pub rotation: bool,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Proxy URLs (`http://`, `https://`, `socks5://`)
    #[serde(default)]
    pub proxies: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            rotation: true,
            user_agents: default_user_agents(),
            proxies: Vec::new(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

/// Enrichment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum language model calls in flight
    #[serde(default = "default_concurrency", alias = "batch_size")]
    pub concurrency: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Language model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ollama server URL
    #[serde(default = "default_model_url")]
    pub base_url: String,

    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_url(),
            name: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model_name() -> String {
    "llama3.1".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.3
}

/// Sink backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Local JSON library file
    #[default]
    Json,
    /// Zotero web library
    Zotero,
}

/// Sink settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,

    /// Library file for the JSON sink (default: `<data_dir>/scholar-harvest/library.json`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub zotero: ZoteroConfig,
}

impl SinkConfig {
    pub fn json_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir().join("library.json"))
    }
}

/// Zotero web API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoteroConfig {
    #[serde(default)]
    pub library_id: String,

    /// "user" or "group"
    #[serde(default = "default_library_type")]
    pub library_type: String,

    /// Falls back to `ZOTERO_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Collection new items are filed into
    #[serde(default)]
    pub collection_key: Option<String>,

    /// Tags added to every item
    #[serde(default = "default_auto_tags")]
    pub auto_tags: Vec<String>,
}

impl Default for ZoteroConfig {
    fn default() -> Self {
        Self {
            library_id: String::new(),
            library_type: default_library_type(),
            api_key: None,
            collection_key: None,
            auto_tags: default_auto_tags(),
        }
    }
}

impl ZoteroConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ZOTERO_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

fn default_library_type() -> String {
    "user".to_string()
}

fn default_auto_tags() -> Vec<String> {
    vec!["scholar-harvest".to_string()]
}

/// Abstract back-fill settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also read abstracts from result landing pages
    #[serde(default = "default_true")]
    pub landing_pages: bool,

    /// Landing page requests per second across all hosts
    #[serde(default = "default_page_rate")]
    pub requests_per_second: f64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            landing_pages: true,
            requests_per_second: default_page_rate(),
        }
    }
}

fn default_page_rate() -> f64 {
    1.0
}

/// Run checkpoint settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Checkpoint directory (default: `<data_dir>/scholar-harvest/runs`)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Merge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Token-set Jaccard threshold for fuzzy title matches
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

/// API keys for external services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    /// Semantic Scholar API key (optional, for higher rate limits)
    #[serde(default)]
    pub semantic_scholar: Option<String>,
}

impl ApiKeys {
    /// Configured key, falling back to `SEMANTIC_SCHOLAR_API_KEY`
    pub fn semantic_scholar(&self) -> Option<String> {
        self.semantic_scholar
            .clone()
            .or_else(|| std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "plain" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

/// Per-source rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRateConfig {
    pub source: String,
    pub requests_per_second: f64,
}

/// Application data directory
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("scholar-harvest"))
        .unwrap_or_else(|| PathBuf::from(".scholar-harvest"))
}

fn default_state_dir() -> PathBuf {
    data_dir().join("runs")
}

/// Locate a configuration file: `./scholar-harvest.toml`, then
/// `<config_dir>/scholar-harvest/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|d| d.join("scholar-harvest").join("config.toml"))
        .filter(|p| p.is_file())
}

/// Load configuration from an optional file plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("search.sources")
                .with_list_parse_key("identity.proxies")
                .with_list_parse_key("identity.user_agents"),
        )
        .build()?;

    settings.try_deserialize()
}
