//! Per-node execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a node failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    /// The agent did not answer within `timeout_ms`.
    Timeout,
    /// The transport to the agent failed.
    ConnectionError,
    /// The agent answered with an error.
    AgentError,
    /// A dependency failed, so the node was never dispatched.
    UpstreamFailure,
}

impl NodeErrorKind {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionError)
    }
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionError => write!(f, "connection_error"),
            Self::AgentError => write!(f, "agent_error"),
            Self::UpstreamFailure => write!(f, "upstream_failure"),
        }
    }
}

/// A captured node failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    /// Error kind.
    pub kind: NodeErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl NodeError {
    /// Creates a new node error.
    #[must_use]
    pub fn new(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The outcome of executing one node.
///
/// Written once; a rerun replaces the map entry with a fresh result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node id.
    pub node_id: String,
    /// Whether the node succeeded.
    pub success: bool,
    /// The agent's result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Wall-clock execution time across all attempts.
    pub execution_time_ms: u64,
    /// Number of agent invocations made.
    pub attempts: u32,
    /// When the first attempt was dispatched.
    pub started_at: DateTime<Utc>,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl NodeResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(
        node_id: impl Into<String>,
        result: serde_json::Value,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            node_id: node_id.into(),
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms: elapsed_ms(started_at, timestamp),
            attempts,
            started_at,
            timestamp,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(
        node_id: impl Into<String>,
        error: NodeError,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            node_id: node_id.into(),
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms: elapsed_ms(started_at, timestamp),
            attempts,
            started_at,
            timestamp,
        }
    }

    /// Creates the result recorded for a node skipped because a dependency failed.
    #[must_use]
    pub fn upstream_failure(node_id: impl Into<String>, failed_dependency: &str) -> Self {
        Self::failure(
            node_id,
            NodeError::new(
                NodeErrorKind::UpstreamFailure,
                format!("dependency '{failed_dependency}' failed"),
            ),
            0,
            Utc::now(),
        )
    }

    /// Returns the error kind, if the node failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<NodeErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_result() {
        let result = NodeResult::success("a", serde_json::json!({"x": 1}), 2, Utc::now());
        assert!(result.success);
        assert_eq!(result.attempts, 2);
        assert!(result.error.is_none());
        assert!(result.timestamp >= result.started_at);
    }

    #[test]
    fn test_upstream_failure_result() {
        let result = NodeResult::upstream_failure("b", "a");
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.error_kind(), Some(NodeErrorKind::UpstreamFailure));
        assert!(result.error.unwrap().message.contains("'a'"));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(NodeErrorKind::Timeout.is_transient());
        assert!(NodeErrorKind::ConnectionError.is_transient());
        assert!(!NodeErrorKind::AgentError.is_transient());
        assert!(!NodeErrorKind::UpstreamFailure.is_transient());
    }

    #[test]
    fn test_result_serialization_omits_empty_fields() {
        let result = NodeResult::success("a", serde_json::json!(1), 1, Utc::now());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("error").is_none());

        let back: NodeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
