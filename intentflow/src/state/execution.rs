//! The mutable record of one execution.

use crate::config::ExecutionConfig;
use crate::core::{ExecutionStatus, NodeResult};
use crate::graph::IntentGraph;
use crate::quality::QualityAssessment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Everything needed to continue an execution without replaying finished nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Unique execution id.
    pub execution_id: String,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// The graph being executed.
    pub graph: IntentGraph,
    /// Settings the execution started with.
    #[serde(default)]
    pub config: ExecutionConfig,
    /// Most recently dispatched node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    /// Succeeded nodes, in completion order.
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    /// Failed nodes, in completion order.
    #[serde(default)]
    pub failed_nodes: Vec<String>,
    /// Nodes on branches that were not taken.
    #[serde(default)]
    pub skipped_nodes: Vec<String>,
    /// Per-node results.
    #[serde(default)]
    pub results: HashMap<String, NodeResult>,
    /// Caller-supplied context, merged on resume.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Approval node the execution is waiting on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_node: Option<String>,
    /// Why the execution paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,
    /// When the execution was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why the execution was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
    /// Reruns performed so far.
    #[serde(default)]
    pub attempt_count: u32,
    /// Latest quality assessment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityAssessment>,
    /// Every assessment, oldest first.
    #[serde(default)]
    pub quality_history: Vec<QualityAssessment>,
    /// Terminal error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Creates a running execution with no resolved nodes.
    #[must_use]
    pub fn new(
        execution_id: impl Into<String>,
        graph: IntentGraph,
        config: ExecutionConfig,
        context: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Running,
            graph,
            config,
            current_node: None,
            completed_nodes: Vec::new(),
            failed_nodes: Vec::new(),
            skipped_nodes: Vec::new(),
            results: HashMap::new(),
            context,
            paused_at_node: None,
            paused_reason: None,
            cancelled_at: None,
            cancelled_reason: None,
            attempt_count: 0,
            quality: None,
            quality_history: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bumps `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns true if the node completed, failed or was skipped.
    #[must_use]
    pub fn is_resolved(&self, node_id: &str) -> bool {
        let contains = |list: &[String]| list.iter().any(|n| n == node_id);
        contains(&self.completed_nodes) || contains(&self.failed_nodes) || contains(&self.skipped_nodes)
    }

    /// Records a node outcome, replacing any earlier one.
    pub fn record_result(&mut self, result: NodeResult) {
        self.forget(&result.node_id);
        if result.success {
            self.completed_nodes.push(result.node_id.clone());
        } else {
            self.failed_nodes.push(result.node_id.clone());
        }
        self.results.insert(result.node_id.clone(), result);
        self.touch();
    }

    /// Records a node on an untaken branch.
    pub fn record_skipped(&mut self, node_id: &str) {
        self.forget(node_id);
        self.skipped_nodes.push(node_id.to_string());
        self.touch();
    }

    /// Makes the given nodes pending again, discarding their results.
    pub fn reset_nodes<'a>(&mut self, node_ids: impl IntoIterator<Item = &'a String>) {
        for id in node_ids {
            self.forget(id);
        }
        self.touch();
    }

    /// Makes every node pending again.
    pub fn reset_all(&mut self) {
        self.completed_nodes.clear();
        self.failed_nodes.clear();
        self.skipped_nodes.clear();
        self.results.clear();
        self.current_node = None;
        self.touch();
    }

    fn forget(&mut self, node_id: &str) {
        self.completed_nodes.retain(|n| n != node_id);
        self.failed_nodes.retain(|n| n != node_id);
        self.skipped_nodes.retain(|n| n != node_id);
        self.results.remove(node_id);
    }

    /// Suspends at an approval node.
    pub fn pause(&mut self, node_id: &str, reason: impl Into<String>) {
        self.status = ExecutionStatus::PausedForApproval;
        self.paused_at_node = Some(node_id.to_string());
        self.paused_reason = Some(reason.into());
        self.current_node = Some(node_id.to_string());
        self.touch();
    }

    /// Clears pause markers and marks the execution running.
    pub fn resume(&mut self) {
        self.status = ExecutionStatus::Running;
        self.paused_at_node = None;
        self.paused_reason = None;
        self.touch();
    }

    /// Moves to `cancelled`.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.status = ExecutionStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancelled_reason = Some(reason.into());
        self.paused_at_node = None;
        self.paused_reason = None;
        self.updated_at = now;
    }

    /// Merges keys into the context, overwriting existing ones.
    pub fn merge_context(&mut self, update: Map<String, Value>) {
        self.context.extend(update);
        self.touch();
    }

    /// Records a quality assessment.
    pub fn record_quality(&mut self, assessment: QualityAssessment) {
        self.quality_history.push(assessment.clone());
        self.quality = Some(assessment);
        self.touch();
    }

    /// Result values of completed nodes keyed by node id.
    #[must_use]
    pub fn output(&self) -> Value {
        let map: Map<String, Value> = self
            .completed_nodes
            .iter()
            .filter_map(|id| {
                let value = self.results.get(id)?.result.clone()?;
                Some((id.clone(), value))
            })
            .collect();
        Value::Object(map)
    }
}
