//! Agent invocation seam.
//!
//! The engine never talks to a transport directly. Every node dispatch goes
//! through an [`AgentClient`], which is expected to be long-lived and shared
//! across nodes (a pooled HTTP client, a persistent RPC channel, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use thiserror::Error;

/// A single agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Node being executed.
    pub node_id: String,
    /// Target agent.
    pub agent: String,
    /// Tool to invoke on the agent.
    pub tool: String,
    /// Resolved input payload.
    pub input: Value,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// The agent's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Marks a failure as transient so it may be retried.
    #[serde(default)]
    pub retryable: bool,
}

impl AgentResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            retryable: false,
        }
    }

    /// Creates a non-retryable failure.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
            retryable: false,
        }
    }

    /// Creates a failure worth retrying.
    #[must_use]
    pub fn transient_error(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::error(message)
        }
    }
}

/// Errors raised by an [`AgentClient`] before a response is obtained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The transport failed (connection refused, reset, 5xx, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was rejected as invalid.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The agent could not handle the call.
    #[error("agent error: {0}")]
    Agent(String),
}

impl AgentError {
    /// Returns true for connection-level failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Reaches agents on behalf of the engine.
#[async_trait]
pub trait AgentClient: Send + Sync + Debug {
    /// Performs one invocation. Called exactly once per attempt.
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// An agent client backed by an async closure.
pub struct FnAgentClient<F, Fut>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, AgentError>> + Send,
{
    name: String,
    func: F,
}

impl<F, Fut> FnAgentClient<F, Fut>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, AgentError>> + Send,
{
    /// Creates a new function-based client.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F, Fut> Debug for FnAgentClient<F, Fut>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, AgentError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAgentClient")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> AgentClient for FnAgentClient<F, Fut>
where
    F: Fn(AgentRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentResponse, AgentError>> + Send,
{
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        (self.func)(request).await
    }
}
