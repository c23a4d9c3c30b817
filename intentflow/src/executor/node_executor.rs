//! Single-node execution with timeout and retry.

use super::agent::{AgentClient, AgentError, AgentRequest, AgentResponse};
use super::retry::{RetryDecision, RetrySettings};
use crate::core::{NodeError, NodeErrorKind, NodeResult};
use crate::graph::{IntentGraph, Node, RetryPolicy};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Everything needed to dispatch one node, resolved ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInvocation {
    /// The node id.
    pub node_id: String,
    /// Target agent.
    pub agent: String,
    /// Tool to call.
    pub tool: String,
    /// Effective retry policy.
    pub retry_policy: RetryPolicy,
    /// Per-attempt timeout, if any.
    pub timeout: Option<Duration>,
}

impl NodeInvocation {
    /// Resolves retry policy and timeout for a node of `graph`.
    #[must_use]
    pub fn for_node(
        node: &Node,
        graph: &IntentGraph,
        retry: &RetrySettings,
        default_timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            node_id: node.id.clone(),
            agent: node.agent.clone(),
            tool: node.tool.clone(),
            retry_policy: retry.resolve_policy(node.retry_policy, graph.default_retry_policy),
            timeout: node
                .timeout_ms
                .or(default_timeout_ms)
                .map(Duration::from_millis),
        }
    }
}

struct AttemptFailure {
    error: NodeError,
    transient: bool,
}

/// Invokes one agent for one node.
///
/// Never returns an error: every failure is captured in the [`NodeResult`].
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    agent: Arc<dyn AgentClient>,
    retry: RetrySettings,
}

impl NodeExecutor {
    /// Creates an executor over a shared agent client.
    #[must_use]
    pub fn new(agent: Arc<dyn AgentClient>, retry: RetrySettings) -> Self {
        Self { agent, retry }
    }

    /// Runs the node, retrying transient failures per its policy.
    pub async fn execute(&self, invocation: &NodeInvocation, input: Value) -> NodeResult {
        let started_at = Utc::now();
        let mut attempt = 1;

        loop {
            debug!(node_id = %invocation.node_id, attempt, "Dispatching node");

            let failure = match self.attempt(invocation, &input, attempt).await {
                Ok(result) => {
                    return NodeResult::success(&invocation.node_id, result, attempt, started_at);
                }
                Err(failure) => failure,
            };

            match self
                .retry
                .decide(&invocation.retry_policy, attempt, failure.transient)
            {
                RetryDecision::Retry(delay) => {
                    debug!(
                        node_id = %invocation.node_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %failure.error,
                        "Retrying node after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    warn!(
                        node_id = %invocation.node_id,
                        attempts = attempt,
                        error = %failure.error,
                        "Node failed"
                    );
                    return NodeResult::failure(&invocation.node_id, failure.error, attempt, started_at);
                }
            }
        }
    }

    async fn attempt(
        &self,
        invocation: &NodeInvocation,
        input: &Value,
        attempt: u32,
    ) -> Result<Value, AttemptFailure> {
        let request = AgentRequest {
            node_id: invocation.node_id.clone(),
            agent: invocation.agent.clone(),
            tool: invocation.tool.clone(),
            input: input.clone(),
            attempt,
        };

        let call = self.agent.invoke(request);
        let outcome = match invocation.timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(AttemptFailure {
                        error: NodeError::new(
                            NodeErrorKind::Timeout,
                            format!("no response within {}ms", limit.as_millis()),
                        ),
                        transient: true,
                    });
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(response) => classify_response(response),
            Err(err) => Err(classify_error(err)),
        }
    }
}

fn classify_response(response: AgentResponse) -> Result<Value, AttemptFailure> {
    if response.success {
        return Ok(response.result.unwrap_or(Value::Null));
    }
    Err(AttemptFailure {
        error: NodeError::new(
            NodeErrorKind::AgentError,
            response
                .error
                .unwrap_or_else(|| "agent reported failure".to_string()),
        ),
        transient: response.retryable,
    })
}

fn classify_error(err: AgentError) -> AttemptFailure {
    let transient = err.is_transient();
    let kind = if transient {
        NodeErrorKind::ConnectionError
    } else {
        NodeErrorKind::AgentError
    };
    AttemptFailure {
        error: NodeError::new(kind, err.to_string()),
        transient,
    }
}
