//! Local JSON library sink.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::Sink;
use crate::models::{CanonicalRecord, FailureReason, Outcome};

/// A JSON file holding an object keyed by canonical id.
///
/// Each upsert rewrites the file through a temporary file and a rename, so a
/// crash mid-write leaves the previous library intact.
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the library; a missing file is an empty library
    pub async fn load(&self) -> Result<BTreeMap<String, CanonicalRecord>, FailureReason> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_failure(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn store(&self, library: &BTreeMap<String, CanonicalRecord>) -> Result<(), FailureReason> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure(parent, e))?;
        }

        let content = serde_json::to_string_pretty(library)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_failure(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_failure(&self.path, e))
    }
}

fn io_failure(path: &Path, err: std::io::Error) -> FailureReason {
    FailureReason::Other(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn upsert(&self, records: &[CanonicalRecord]) -> Outcome<usize> {
        let _guard = self.write_lock.lock().await;

        let mut library = match self.load().await {
            Ok(library) => library,
            Err(reason) => return Outcome::failure(reason),
        };

        for record in records {
            library.insert(record.canonical_id.clone(), record.clone());
        }

        match self.store(&library).await {
            Ok(()) => {
                tracing::info!(
                    "Wrote {} records to {} ({} total)",
                    records.len(),
                    self.path.display(),
                    library.len()
                );
                Outcome::Success(records.len())
            }
            Err(reason) => Outcome::failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Enrichment;
    use crate::sources::mock::make_candidate;
    use crate::utils::merge_candidates;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upsert_creates_and_updates() {
        let dir = tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("library").join("papers.json"));

        let mut records = merge_candidates(&[
            make_candidate("arxiv", "1", "Attention is all you need"),
            make_candidate("semantic", "2", "Deep residual learning"),
        ]);

        assert_eq!(sink.upsert(&records).await, Outcome::Success(2));

        records[0].mark_enriched(Enrichment {
            analysis: "Transformers.".into(),
            keywords: vec!["attention".into()],
        });
        assert_eq!(sink.upsert(&records[..1]).await, Outcome::Success(1));

        let library = sink.load().await.unwrap();
        assert_eq!(library.len(), 2);
        assert!(library[&records[0].canonical_id].is_enriched());
        assert!(!dir.path().join("library").join("papers.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_library() {
        let dir = tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("absent.json"));
        assert!(sink.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_library_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("papers.json");
        std::fs::write(&path, "{ not json").unwrap();

        let sink = JsonFileSink::new(&path);
        assert!(sink.upsert(&[]).await.is_fatal());
    }
}
