//! Durable run checkpoints.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::RunState;

/// Errors raised by a [`StateStore`]
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid run id '{0}'")]
    InvalidRunId(String),
}

/// Storage for [`RunState`] checkpoints keyed by run id
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Persist the state, replacing any earlier checkpoint of the run
    async fn save(&self, state: &RunState) -> Result<(), StateError>;

    /// Load a checkpoint; `Ok(None)` if the run is unknown
    async fn load(&self, run_id: &str) -> Result<Option<RunState>, StateError>;

    /// Known run ids, sorted
    async fn list(&self) -> Result<Vec<String>, StateError>;
}

/// Run ids become file names, so only a safe alphabet is accepted
fn validate_run_id(run_id: &str) -> Result<(), StateError> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidRunId(run_id.to_string()))
    }
}

/// One JSON file per run in a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    directory: PathBuf,
}

impl FileStateStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", run_id))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, state: &RunState) -> Result<(), StateError> {
        validate_run_id(&state.run_id)?;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(io_error(&self.directory))?;

        let path = self.path_for(&state.run_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(state)?;

        // Write then rename so a crash never leaves a torn checkpoint
        tokio::fs::write(&tmp, content).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;

        tracing::debug!("Checkpointed run {} at stage {}", state.run_id, state.stage);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, StateError> {
        validate_run_id(run_id)?;

        let path = self.path_for(run_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StateError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.directory)(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error(&self.directory))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_run_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// In-memory store for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<BTreeMap<String, RunState>>,
    saves: Mutex<Vec<(String, crate::models::Stage)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save so far as (run id, stage), in order
    pub fn history(&self) -> Vec<(String, crate::models::Stage)> {
        lock(&self.saves).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, state: &RunState) -> Result<(), StateError> {
        validate_run_id(&state.run_id)?;
        lock(&self.saves).push((state.run_id.clone(), state.stage));
        lock(&self.states).insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunState>, StateError> {
        Ok(lock(&self.states).get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, StateError> {
        Ok(lock(&self.states).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Query, Stage};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("runs"));

        let mut state = RunState::new("run-1", Query::new("graph neural networks"));
        state.advance(Stage::Searching);
        store.save(&state).await.unwrap();

        state.advance(Stage::Merging);
        store.save(&state).await.unwrap();

        let loaded = store.load("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Merging);
        assert_eq!(loaded.query.text, "graph neural networks");
        assert!(!dir.path().join("runs").join("run-1.json.tmp").exists());

        assert_eq!(store.list().await.unwrap(), vec!["run-1"]);
    }

    #[tokio::test]
    async fn test_unknown_run_and_empty_directory() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("missing"));
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_run_ids() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StateError::InvalidRunId(_)));

        let state = RunState::new("a/b", Query::new("q"));
        assert!(store.save(&state).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let store = FileStateStore::new(dir.path());
        assert!(matches!(
            store.load("broken").await,
            Err(StateError::Serde(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_history() {
        let store = MemoryStateStore::new();
        let mut state = RunState::new("r", Query::new("q"));
        store.save(&state).await.unwrap();
        state.advance(Stage::Searching);
        store.save(&state).await.unwrap();

        assert_eq!(
            store.history(),
            vec![("r".to_string(), Stage::Init), ("r".to_string(), Stage::Searching)]
        );
        assert_eq!(store.load("r").await.unwrap().unwrap().stage, Stage::Searching);
    }
}
