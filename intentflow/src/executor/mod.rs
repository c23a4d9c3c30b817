//! Node execution.
//!
//! This module provides:
//! - The [`AgentClient`] seam used to reach agents
//! - Retry/backoff policy evaluation
//! - Input placeholder resolution
//! - [`NodeExecutor`], which runs one node with timeout and retry

mod agent;
#[cfg(feature = "http")]
mod http;
mod input;
mod node_executor;
mod retry;

pub use agent::{AgentClient, AgentError, AgentRequest, AgentResponse, FnAgentClient};
#[cfg(feature = "http")]
pub use http::HttpAgentClient;
pub use input::resolve_input;
pub use node_executor::{NodeExecutor, NodeInvocation};
pub use retry::{backoff_delay_ms, BackoffStrategy, JitterStrategy, RetryDecision, RetrySettings};
