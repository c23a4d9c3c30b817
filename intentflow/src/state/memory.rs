//! In-memory state store.

use super::{ExecutionState, ExecutionStateStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Keeps serialized snapshots in a concurrent map.
///
/// Snapshots are stored as JSON so a stored state never aliases the live one.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStateStore {
    entries: DashMap<String, String>,
}

impl InMemoryExecutionStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ExecutionStateStore for InMemoryExecutionStateStore {
    async fn put(&self, execution_id: &str, state: &ExecutionState) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(state)?;
        self.entries.insert(execution_id.to_string(), snapshot);
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<ExecutionState, StoreError> {
        let snapshot = self
            .entries
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
        Ok(serde_json::from_str(&snapshot)?)
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StoreError> {
        self.entries.remove(execution_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::graph::IntentGraph;
    use serde_json::Map;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn state(id: &str) -> ExecutionState {
        ExecutionState::new(id, IntentGraph::new("g"), ExecutionConfig::default(), Map::new())
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryExecutionStateStore::new();
        assert_ok!(store.put("e1", &state("e1")).await);

        let loaded = assert_ok!(store.get("e1").await);
        assert_eq!(loaded.execution_id, "e1");

        assert_ok!(store.delete("e1").await);
        assert!(matches!(assert_err!(store.get("e1").await), StoreError::NotFound(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let store = InMemoryExecutionStateStore::new();
        let mut live = state("e1");
        store.put("e1", &live).await.unwrap();

        live.record_skipped("x");
        let stored = store.get("e1").await.unwrap();
        assert!(stored.skipped_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_keys() {
        let store = Arc::new(InMemoryExecutionStateStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("e{i}");
                    store.put(&id, &state(&id)).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 16);
    }
}
