//! Pause/resume bookkeeping and per-execution ownership.

use super::notifier::{ApprovalNotice, HitlNotifier};
use crate::core::{ExecutionStatus, NodeResult};
use crate::errors::EngineError;
use crate::graph::ApprovalSpec;
use crate::state::{ExecutionState, ExecutionStateStore};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};

/// A human decision on an approval node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Continue on `next_on_approve`.
    Approved,
    /// Continue on `next_on_reject`.
    Rejected,
}

impl ApprovalDecision {
    /// Returns true for [`ApprovalDecision::Approved`].
    #[must_use]
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl From<bool> for ApprovalDecision {
    fn from(approved: bool) -> Self {
        if approved {
            Self::Approved
        } else {
            Self::Rejected
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Exclusive ownership of one execution's state.
pub type ExecutionGuard = OwnedMutexGuard<()>;

/// Serializes writers per execution and drives the approval state machine.
#[derive(Debug, Default)]
pub struct HitlController {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HitlController {
    /// Creates a controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive ownership of an execution.
    pub async fn acquire(&self, execution_id: &str) -> ExecutionGuard {
        let lock = self
            .locks
            .entry(execution_id.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drops the lock entry of a finished execution if nobody else holds it.
    pub fn release(&self, execution_id: &str) {
        self.locks
            .remove_if(execution_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Suspends `state` at an approval node.
    ///
    /// The snapshot must reach the store before the pause is reported; the
    /// notifier is only told once it has.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceRequiredForPauseFailed`] if the store
    /// rejects the snapshot.
    pub async fn pause(
        &self,
        state: &mut ExecutionState,
        node_id: &str,
        spec: &ApprovalSpec,
        store: &dyn ExecutionStateStore,
        notifier: &dyn HitlNotifier,
    ) -> Result<(), EngineError> {
        state.pause(node_id, spec.options.action_description.clone());

        if let Err(source) = store.put(&state.execution_id, state).await {
            error!(
                execution_id = %state.execution_id,
                node_id = %node_id,
                error = %source,
                "Failed to persist state before pausing"
            );
            return Err(EngineError::PersistenceRequiredForPauseFailed {
                execution_id: state.execution_id.clone(),
                node_id: node_id.to_string(),
                source,
            });
        }

        info!(execution_id = %state.execution_id, node_id = %node_id, "Execution paused for approval");
        notifier
            .notify(ApprovalNotice::new(&state.execution_id, node_id, spec))
            .await;
        Ok(())
    }

    /// Applies a decision to a paused state and returns the approval node id.
    ///
    /// Merges `modified_context`, completes the approval node with
    /// `{approved, modified_context}` and marks the execution running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] unless the execution is paused.
    pub fn apply_decision(
        state: &mut ExecutionState,
        decision: ApprovalDecision,
        modified_context: Option<Map<String, Value>>,
    ) -> Result<String, EngineError> {
        let node_id = match (&state.status, &state.paused_at_node) {
            (ExecutionStatus::PausedForApproval, Some(node_id)) => node_id.clone(),
            (status, _) => {
                return Err(EngineError::InvalidState {
                    execution_id: state.execution_id.clone(),
                    status: *status,
                    operation: "resume",
                });
            }
        };

        let context_value = modified_context
            .as_ref()
            .map_or(Value::Null, |ctx| Value::Object(ctx.clone()));
        if let Some(ctx) = modified_context {
            state.merge_context(ctx);
        }

        let result = json!({
            "approved": decision.is_approved(),
            "modified_context": context_value,
        });
        state.record_result(NodeResult::success(&node_id, result, 1, Utc::now()));
        state.resume();

        info!(
            execution_id = %state.execution_id,
            node_id = %node_id,
            decision = %decision,
            "Approval decision applied"
        );
        Ok(node_id)
    }
}
