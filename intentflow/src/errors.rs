//! Error types for the intentflow engine.
//!
//! Validation and persistence errors abort a call. Node-level failures never
//! surface here: they are recorded as [`crate::core::NodeError`] values inside
//! the node result and the execution keeps going on independent branches.

use crate::core::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The submitted graph is not a well-formed DAG.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// State could not be persisted before pausing for approval.
    #[error("failed to persist execution '{execution_id}' before pausing at node '{node_id}': {source}")]
    PersistenceRequiredForPauseFailed {
        /// The execution that tried to pause.
        execution_id: String,
        /// The approval node it was pausing at.
        node_id: String,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// No state is stored for the execution id.
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// The operation is not valid for the execution's current status.
    #[error("cannot {operation} execution '{execution_id}' in status '{status}'")]
    InvalidState {
        /// The execution id.
        execution_id: String,
        /// The current status.
        status: ExecutionStatus,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The pre-execution safety check rejected the request.
    #[error("safety check failed: {}", errors.join("; "))]
    SafetyCheckFailed {
        /// Reported violations.
        errors: Vec<String>,
    },

    /// The configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A store operation failed where persistence was mandatory.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Discriminant of a [`GraphValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// A dependency cycle exists.
    CycleDetected,
    /// A reference points at an undeclared node.
    DanglingReference,
    /// An approval node lacks its branch targets.
    MalformedApprovalNode,
    /// Two nodes share an id.
    DuplicateNode,
    /// The graph has no nodes.
    EmptyGraph,
    /// An edge condition cannot be compiled.
    InvalidCondition,
}

/// Error raised when a submitted intent graph is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphValidationError {
    /// A back-edge to a node still on the traversal stack.
    #[error("Cycle detected at node '{node}': {}", path.join(" -> "))]
    CycleDetected {
        /// The node the back-edge points to.
        node: String,
        /// The nodes forming the cycle, first and last equal.
        path: Vec<String>,
    },

    /// A dependency, edge endpoint, branch target or plan entry is unknown.
    #[error("Node '{node}' references unknown node '{reference}' in {field}")]
    DanglingReference {
        /// The referencing node (or edge source).
        node: String,
        /// The unknown id.
        reference: String,
        /// Where the reference was found.
        field: &'static str,
    },

    /// An approval node is missing a branch declaration.
    #[error("Approval node '{node}' is missing {missing}")]
    MalformedApprovalNode {
        /// The approval node.
        node: String,
        /// The missing field(s).
        missing: String,
    },

    /// Two nodes share the same id.
    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    /// The graph contains no nodes.
    #[error("Intent graph '{0}' has no nodes")]
    EmptyGraph(String),

    /// An edge condition carries a pattern that does not compile.
    #[error("Edge '{from}' -> '{to}' has an invalid pattern '{pattern}': {reason}")]
    InvalidCondition {
        /// Producer node id.
        from: String,
        /// Consumer node id.
        to: String,
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl GraphValidationError {
    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::CycleDetected { .. } => ValidationErrorKind::CycleDetected,
            Self::DanglingReference { .. } => ValidationErrorKind::DanglingReference,
            Self::MalformedApprovalNode { .. } => ValidationErrorKind::MalformedApprovalNode,
            Self::DuplicateNode(_) => ValidationErrorKind::DuplicateNode,
            Self::EmptyGraph(_) => ValidationErrorKind::EmptyGraph,
            Self::InvalidCondition { .. } => ValidationErrorKind::InvalidCondition,
        }
    }

    /// Returns diagnostics for the error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::CycleDetected { node, path } => ContractErrorInfo::new(
                "GRAPH-001-CYCLE",
                format!("Intent graph contains a cycle: {}", path.join(" -> ")),
            )
            .with_fix_hint("Remove one of the dependencies or edges in the cycle to break it.")
            .with_context_entry("node", node.clone()),
            Self::DanglingReference { node, reference, field } => ContractErrorInfo::new(
                "GRAPH-002-DANGLING",
                format!("'{reference}' is not a node of this graph"),
            )
            .with_fix_hint("Check for typos in node ids and make sure every referenced node is declared.")
            .with_context_entry("node", node.clone())
            .with_context_entry("field", *field),
            Self::MalformedApprovalNode { node, missing } => ContractErrorInfo::new(
                "GRAPH-003-APPROVAL",
                format!("Approval node '{node}' does not declare {missing}"),
            )
            .with_fix_hint(
                "Declare both next_on_approve and next_on_reject, or set approval_options.fallthrough.",
            ),
            Self::DuplicateNode(node) => {
                ContractErrorInfo::new("GRAPH-004-DUPLICATE", format!("Node id '{node}' is declared twice"))
                    .with_fix_hint("Give every node a unique id.")
            }
            Self::EmptyGraph(graph_id) => {
                ContractErrorInfo::new("GRAPH-005-EMPTY", format!("Graph '{graph_id}' has no nodes"))
                    .with_fix_hint("Add at least one node to the graph before submitting it.")
            }
            Self::InvalidCondition { from, to, pattern, reason } => ContractErrorInfo::new(
                "GRAPH-006-CONDITION",
                format!("Pattern '{pattern}' on edge '{from}' -> '{to}' does not compile: {reason}"),
            )
            .with_fix_hint("Fix the regular expression in the edge condition.")
            .with_context_entry("from", from.clone())
            .with_context_entry("to", to.clone()),
        }
    }
}

/// Errors raised by an execution state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No state is stored under the key.
    #[error("no execution state stored for '{0}'")]
    NotFound(String),

    /// The state could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure reported by an external collaborator (quality gate, safety validator).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub collaborator: &'static str,
    /// The failure message.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value '{value}' for {key}")]
    InvalidEnv {
        /// The variable name.
        key: String,
        /// The raw value.
        value: String,
    },

    /// The JSON document could not be parsed.
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display_and_info() {
        let err = GraphValidationError::CycleDetected {
            node: "a".to_string(),
            path: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.kind(), ValidationErrorKind::CycleDetected);
        assert_eq!(err.error_info().code, "GRAPH-001-CYCLE");
    }

    #[test]
    fn test_dangling_reference_info_context() {
        let err = GraphValidationError::DanglingReference {
            node: "b".into(),
            reference: "ghost".into(),
            field: "dependencies",
        };

        let info = err.error_info();
        assert_eq!(info.context.get("field"), Some(&"dependencies".to_string()));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_engine_error_wraps_validation() {
        let err: EngineError = GraphValidationError::EmptyGraph("g".into()).into();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = EngineError::InvalidState {
            execution_id: "e1".into(),
            status: ExecutionStatus::Completed,
            operation: "resume",
        };
        assert_eq!(err.to_string(), "cannot resume execution 'e1' in status 'completed'");
    }
}
