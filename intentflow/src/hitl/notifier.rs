//! Operator notification side channel.

use crate::graph::ApprovalSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Tells an operator that an execution awaits a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalNotice {
    /// The paused execution.
    pub execution_id: String,
    /// The approval node.
    pub node_id: String,
    /// What the operator is asked to approve.
    pub action_description: String,
    /// Choices offered to the operator.
    #[serde(default)]
    pub approval_options: Vec<String>,
    /// Advisory decision deadline; enforcement is up to the notifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ApprovalNotice {
    /// Builds a notice for an approval node.
    #[must_use]
    pub fn new(execution_id: &str, node_id: &str, spec: &ApprovalSpec) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            action_description: spec.options.action_description.clone(),
            approval_options: spec.options.options.clone(),
            timeout_seconds: spec.options.timeout_seconds,
        }
    }
}

/// Fire-and-forget notification of pending approvals.
#[async_trait]
pub trait HitlNotifier: Send + Sync + Debug {
    /// Delivers the notice. Failures must be handled internally.
    async fn notify(&self, notice: ApprovalNotice);
}

/// Logs approval requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHitlNotifier;

#[async_trait]
impl HitlNotifier for LoggingHitlNotifier {
    async fn notify(&self, notice: ApprovalNotice) {
        info!(
            execution_id = %notice.execution_id,
            node_id = %notice.node_id,
            action = %notice.action_description,
            "Approval required"
        );
    }
}

/// Forwards approval requests to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHitlNotifier {
    tx: mpsc::UnboundedSender<ApprovalNotice>,
}

impl ChannelHitlNotifier {
    /// Creates the notifier and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl HitlNotifier for ChannelHitlNotifier {
    async fn notify(&self, notice: ApprovalNotice) {
        if let Err(e) = self.tx.send(notice) {
            warn!(execution_id = %e.0.execution_id, "Approval notice dropped, receiver closed");
        }
    }
}
