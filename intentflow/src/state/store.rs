//! The persistence contract.

use super::ExecutionState;
use crate::errors::StoreError;
use async_trait::async_trait;

/// Keyed snapshot storage for execution state.
///
/// Implementations must tolerate concurrent calls for different keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Stores a snapshot, replacing any previous one.
    async fn put(&self, execution_id: &str, state: &ExecutionState) -> Result<(), StoreError>;

    /// Loads a snapshot, or [`StoreError::NotFound`].
    async fn get(&self, execution_id: &str) -> Result<ExecutionState, StoreError>;

    /// Removes a snapshot; removing a missing key is not an error.
    async fn delete(&self, execution_id: &str) -> Result<(), StoreError>;

    /// Lists stored execution ids.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}
