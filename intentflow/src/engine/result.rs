//! The structured outcome returned by every engine call.

use crate::core::{ExecutionStatus, NodeResult};
use crate::quality::QualityAssessment;
use crate::state::ExecutionState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What a caller sees after `execute_graph`, `resume` or `cancel_execution`.
///
/// Node-level failures are reported here, not as errors: inspect
/// [`ExecutionResult::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The execution id.
    pub execution_id: String,
    /// Final or paused status.
    pub status: ExecutionStatus,
    /// Succeeded nodes, in completion order.
    pub completed_nodes: Vec<String>,
    /// Failed nodes, in completion order.
    pub failed_nodes: Vec<String>,
    /// Nodes on untaken branches.
    pub skipped_nodes: Vec<String>,
    /// Per-node results.
    pub results: HashMap<String, NodeResult>,
    /// Result values of completed nodes keyed by node id, after sanitization.
    pub output: Value,
    /// Approval node the execution is waiting on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_node: Option<String>,
    /// Why the execution paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,
    /// Latest quality assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityAssessment>,
    /// Reruns performed.
    pub attempt_count: u32,
    /// Terminal error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of this call.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Builds a result from a state snapshot and an already-sanitized output.
    #[must_use]
    pub fn from_state(state: &ExecutionState, output: Value, duration_ms: u64) -> Self {
        Self {
            execution_id: state.execution_id.clone(),
            status: state.status,
            completed_nodes: state.completed_nodes.clone(),
            failed_nodes: state.failed_nodes.clone(),
            skipped_nodes: state.skipped_nodes.clone(),
            results: state.results.clone(),
            output,
            paused_at_node: state.paused_at_node.clone(),
            paused_reason: state.paused_reason.clone(),
            quality: state.quality.clone(),
            attempt_count: state.attempt_count,
            error: state.error.clone(),
            duration_ms,
        }
    }

    /// Returns true if the execution completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Returns true if the execution awaits an approval decision.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status == ExecutionStatus::PausedForApproval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::testing::linear_graph;
    use chrono::Utc;
    use serde_json::{json, Map};

    #[test]
    fn test_from_paused_state() {
        let mut state = ExecutionState::new(
            "exec-1",
            linear_graph(&["a", "b"]),
            ExecutionConfig::default(),
            Map::new(),
        );
        state.record_result(NodeResult::success("a", json!({"x": 1}), 1, Utc::now()));
        state.pause("b", "Check the draft");

        let result = ExecutionResult::from_state(&state, state.output(), 12);
        assert!(result.is_paused());
        assert!(!result.is_success());
        assert_eq!(result.paused_at_node.as_deref(), Some("b"));
        assert_eq!(result.output, json!({"a": {"x": 1}}));
        assert_eq!(result.duration_ms, 12);
    }

    #[test]
    fn test_serialization_omits_empty_optionals() {
        let state = ExecutionState::new(
            "exec-2",
            linear_graph(&["a"]),
            ExecutionConfig::default(),
            Map::new(),
        );
        let result = ExecutionResult::from_state(&state, json!({}), 0);
        let value = serde_json::to_value(&result).unwrap();

        assert!(value.get("paused_at_node").is_none());
        assert!(value.get("error").is_none());
        assert_eq!(value["status"], serde_json::to_value(ExecutionStatus::Running).unwrap());
    }
}
