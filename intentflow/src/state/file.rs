//! File-backed state store.

use super::{ExecutionState, ExecutionStateStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Stores one JSON document per execution under a directory.
///
/// File names are the SHA-256 hex digest of the execution id, so arbitrary
/// ids map to safe names. Writes go to a temporary file that is then renamed
/// over the target, so readers never see a partial snapshot.
#[derive(Debug, Clone)]
pub struct FileExecutionStateStore {
    dir: PathBuf,
}

impl FileExecutionStateStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(execution_id.as_bytes()));
        self.dir.join(format!("{digest}.json"))
    }
}

#[async_trait]
impl ExecutionStateStore for FileExecutionStateStore {
    async fn put(&self, execution_id: &str, state: &ExecutionState) -> Result<(), StoreError> {
        let target = self.path_for(execution_id);
        let tmp = target.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

        let bytes = serde_json::to_vec_pretty(state)?;
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<ExecutionState, StoreError> {
        match fs::read(self.path_for(execution_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(execution_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(execution_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(doc) => {
                    if let Some(id) = doc.get("execution_id").and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable state file");
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::core::ExecutionStatus;
    use crate::graph::IntentGraph;
    use serde_json::Map;

    fn state(id: &str) -> ExecutionState {
        ExecutionState::new(id, IntentGraph::new("g"), ExecutionConfig::default(), Map::new())
    }

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileExecutionStateStore::open(dir.path()).await.unwrap();

        let mut paused = state("exec/with:odd chars");
        paused.pause("h", "approve");
        store.put(&paused.execution_id, &paused).await.unwrap();
        store.put("e2", &state("e2")).await.unwrap();

        let loaded = store.get("exec/with:odd chars").await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::PausedForApproval);
        assert_eq!(
            store.list().await.unwrap(),
            vec!["e2".to_string(), "exec/with:odd chars".to_string()]
        );

        store.delete("e2").await.unwrap();
        store.delete("e2").await.unwrap();
        assert!(matches!(store.get("e2").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileExecutionStateStore::open(dir.path()).await.unwrap();

        for _ in 0..3 {
            store.put("e1", &state("e1")).await.unwrap();
        }

        let count = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 1);
    }
}
