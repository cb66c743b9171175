//! Configuration file support.
//!
//! # Configuration File Format
//!
//! ```toml
//! [search]
//! sources = ["arxiv", "semantic"]
//! max_results = 10
//!
//! [backfill]
//! enabled = true
//! landing_pages = true
//! requests_per_second = 1.0
//!
//! [retry.search]
//! max_attempts = 3
//! base_delay_ms = 2000
//! max_delay_ms = 60000
//! jitter_fraction = 0.25
//! timeout_secs = 30
//!
//! [identity]
//! rotation = true
//! proxies = ["socks5://127.0.0.1:9050"]
//!
//! [enrichment]
//! concurrency = 4
//!
//! [model]
//! base_url = "http://localhost:11434"
//! name = "llama3.1"
//!
//! [sink]
//! kind = "zotero"
//!
//! [sink.zotero]
//! library_id = "123456"
//! auto_tags = ["scholar-harvest"]
//!
//! [[source_rates]]
//! source = "semantic"
//! requests_per_second = 0.5
//! ```

use std::path::Path;

use super::Config;

/// Read a TOML configuration file without environment overrides
pub fn load_file(path: &Path) -> Result<Config, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))
}

/// Write a configuration as TOML, creating parent directories
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigFileError> {
    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
    }

    std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
