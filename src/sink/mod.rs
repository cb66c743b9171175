//! Reference-manager sinks.
//!
//! A [`Sink`] receives the final record set of a run. Upserts are keyed by
//! `canonical_id`, so writing the same records twice leaves the destination
//! unchanged; this is what makes a retried or resumed `Sinking` stage safe.

mod json_file;
mod memory;
mod zotero;

pub use json_file::JsonFileSink;
pub use memory::MemorySink;
pub use zotero::ZoteroSink;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, SinkKind};
use crate::models::{CanonicalRecord, FailureReason, Outcome};

/// Tag carried by records whose enrichment failed
pub const ENRICHMENT_FAILED_TAG: &str = "enrichment-failed";

/// Destination for canonical records
#[async_trait]
pub trait Sink: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Insert or update every record; returns how many were written.
    async fn upsert(&self, records: &[CanonicalRecord]) -> Outcome<usize>;
}

/// Build the sink selected by `sink.kind`
pub fn sink_from_config(config: &Config) -> Result<Arc<dyn Sink>, FailureReason> {
    match config.sink.kind {
        SinkKind::Json => Ok(Arc::new(JsonFileSink::new(config.sink.json_path()))),
        SinkKind::Zotero => Ok(Arc::new(ZoteroSink::from_config(&config.sink.zotero)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sink_is_json() {
        let sink = sink_from_config(&Config::default()).unwrap();
        assert_eq!(sink.name(), "json");
    }

    #[test]
    fn test_zotero_without_library_is_rejected() {
        let mut config = Config::default();
        config.sink.kind = SinkKind::Zotero;
        config.sink.zotero.api_key = Some("key".into());

        let err = sink_from_config(&config).unwrap_err();
        assert!(matches!(err, FailureReason::InvalidRequest(_)));
    }
}
