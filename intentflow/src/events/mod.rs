//! Engine lifecycle events.
//!
//! Every state transition of an execution is reported as an [`EngineEvent`]
//! to the engine's [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::{ExecutionStatus, NodeError};
use crate::quality::{QualityAssessment, RerunStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A lifecycle event of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// The event type (e.g. `"node.completed"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// The execution the event belongs to.
    pub execution_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EngineEvent {
    /// Creates an event without payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            data: Map::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// `execution.started`
    #[must_use]
    pub fn execution_started(execution_id: &str, graph_id: &str, node_count: usize) -> Self {
        Self::new("execution.started", execution_id)
            .add_data("graph_id", json!(graph_id))
            .add_data("node_count", json!(node_count))
    }

    /// `execution.resumed`
    #[must_use]
    pub fn execution_resumed(execution_id: &str, node_id: &str, approved: bool) -> Self {
        Self::new("execution.resumed", execution_id)
            .add_data("node_id", json!(node_id))
            .add_data("approved", json!(approved))
    }

    /// `node.started`
    #[must_use]
    pub fn node_started(execution_id: &str, node_id: &str) -> Self {
        Self::new("node.started", execution_id).add_data("node_id", json!(node_id))
    }

    /// `node.completed`
    #[must_use]
    pub fn node_completed(execution_id: &str, node_id: &str, duration_ms: u64, attempts: u32) -> Self {
        Self::new("node.completed", execution_id)
            .add_data("node_id", json!(node_id))
            .add_data("duration_ms", json!(duration_ms))
            .add_data("attempts", json!(attempts))
    }

    /// `node.failed`
    #[must_use]
    pub fn node_failed(execution_id: &str, node_id: &str, error: &NodeError) -> Self {
        Self::new("node.failed", execution_id)
            .add_data("node_id", json!(node_id))
            .add_data("error_kind", json!(error.kind))
            .add_data("error", json!(error.message))
    }

    /// `node.skipped`
    #[must_use]
    pub fn node_skipped(execution_id: &str, node_id: &str) -> Self {
        Self::new("node.skipped", execution_id)
            .add_data("node_id", json!(node_id))
            .add_data("reason", json!("branch not taken"))
    }

    /// `execution.paused`
    #[must_use]
    pub fn execution_paused(execution_id: &str, node_id: &str, action_description: &str) -> Self {
        Self::new("execution.paused", execution_id)
            .add_data("node_id", json!(node_id))
            .add_data("action_description", json!(action_description))
    }

    /// `quality.evaluated`
    #[must_use]
    pub fn quality_evaluated(execution_id: &str, attempt: u32, assessment: &QualityAssessment) -> Self {
        Self::new("quality.evaluated", execution_id)
            .add_data("attempt", json!(attempt))
            .add_data("quality_score", json!(assessment.quality_score))
            .add_data("is_acceptable", json!(assessment.is_acceptable))
            .add_data("rerun_required", json!(assessment.rerun_required))
    }

    /// `execution.rerun`
    #[must_use]
    pub fn execution_rerun(
        execution_id: &str,
        attempt: u32,
        strategy: RerunStrategy,
        nodes: &[String],
    ) -> Self {
        Self::new("execution.rerun", execution_id)
            .add_data("attempt", json!(attempt))
            .add_data("strategy", json!(strategy))
            .add_data("nodes", json!(nodes))
    }

    /// `execution.finished`
    #[must_use]
    pub fn execution_finished(execution_id: &str, status: ExecutionStatus, duration_ms: u64) -> Self {
        Self::new("execution.finished", execution_id)
            .add_data("status", json!(status))
            .add_data("duration_ms", json!(duration_ms))
    }

    /// `execution.cancelled`
    #[must_use]
    pub fn execution_cancelled(execution_id: &str, reason: &str) -> Self {
        Self::new("execution.cancelled", execution_id).add_data("reason", json!(reason))
    }
}
