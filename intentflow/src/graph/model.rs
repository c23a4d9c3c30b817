//! Wire model of an intent graph.

use crate::executor::BackoffStrategy;
use serde::{Deserialize, Deserializer, Serialize};

/// Agent name that marks a node as an approval node.
pub const APPROVAL_AGENT: &str = "hitl";

/// A directed acyclic graph of agent invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentGraph {
    /// Graph identifier assigned by the planner.
    pub graph_id: String,
    /// Graph version.
    #[serde(default = "default_version")]
    pub version: String,
    /// The nodes.
    pub nodes: Vec<Node>,
    /// Explicit edges, optionally conditional.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Planner hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    /// Retry policy for nodes that do not declare one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry_policy: Option<RetryPolicy>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl IntentGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            version: default_version(),
            nodes: Vec::new(),
            edges: Vec::new(),
            execution_plan: None,
            default_retry_policy: None,
        }
    }

    /// Parses a graph from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Sets the graph-level retry policy.
    #[must_use]
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = Some(policy);
        self
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One agent/tool invocation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub id: String,
    /// Agent to invoke, or `"hitl"` for an approval node.
    #[serde(default)]
    pub agent: String,
    /// Tool exposed by the agent.
    #[serde(default)]
    pub tool: String,
    /// Input payload; may contain `${node.path}` placeholders.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Nodes that must complete before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Retry policy override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Approval settings; presence marks an approval node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_options: Option<ApprovalOptions>,
    /// Nodes to run when approved.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_on_approve: Option<Vec<String>>,
    /// Nodes to run when rejected.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_on_reject: Option<Vec<String>>,
}

impl Node {
    /// Creates a standard node.
    #[must_use]
    pub fn new(id: impl Into<String>, agent: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            tool: tool.into(),
            input: serde_json::Value::Null,
            dependencies: Vec::new(),
            retry_policy: None,
            timeout_ms: None,
            approval_options: None,
            next_on_approve: None,
            next_on_reject: None,
        }
    }

    /// Creates an approval node.
    #[must_use]
    pub fn approval(id: impl Into<String>, action_description: impl Into<String>) -> Self {
        let mut node = Self::new(id, APPROVAL_AGENT, "approval");
        node.approval_options = Some(ApprovalOptions::new(action_description));
        node
    }

    /// Sets the input payload.
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the approval options.
    #[must_use]
    pub fn with_approval_options(mut self, options: ApprovalOptions) -> Self {
        self.approval_options = Some(options);
        self
    }

    /// Sets the nodes to run on approval.
    #[must_use]
    pub fn on_approve(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.next_on_approve = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the nodes to run on rejection.
    #[must_use]
    pub fn on_reject(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.next_on_reject = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if the node is tagged as an approval node.
    #[must_use]
    pub fn is_approval(&self) -> bool {
        self.agent == APPROVAL_AGENT || self.approval_options.is_some()
    }
}

/// Settings carried by an approval node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalOptions {
    /// What the operator is asked to approve.
    #[serde(default)]
    pub action_description: String,
    /// Choices presented to the operator.
    #[serde(default)]
    pub options: Vec<String>,
    /// Advisory deadline for the external notifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Lets a missing branch fall through to the node's ordinary dependents.
    #[serde(default)]
    pub fallthrough: bool,
}

impl ApprovalOptions {
    /// Creates approval options with the default approve/reject choices.
    #[must_use]
    pub fn new(action_description: impl Into<String>) -> Self {
        Self {
            action_description: action_description.into(),
            options: vec!["approve".to_string(), "reject".to_string()],
            timeout_seconds: None,
            fallthrough: false,
        }
    }

    /// Sets the advisory timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Enables fallthrough for missing branches.
    #[must_use]
    pub fn with_fallthrough(mut self) -> Self {
        self.fallthrough = true;
        self
    }
}

/// Per-node retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay growth between attempts.
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// A dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Producer node id.
    pub from: String,
    /// Consumer node id.
    pub to: String,
    /// Condition on the producer's result; absent means always satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<crate::graph::EdgeCondition>,
}

impl Edge {
    /// Creates an unconditional edge.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Creates a conditional edge.
    #[must_use]
    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: crate::graph::EdgeCondition,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition),
        }
    }
}

/// Planner hints. Informational only; the scheduler derives its own order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Groups the planner expects to run concurrently.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    /// Planner's duration estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    }))
}
