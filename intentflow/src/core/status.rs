//! Execution status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of an execution.
///
/// `Running -> PausedForApproval -> Running` is the only loop; every other
/// transition ends in a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Nodes are being scheduled.
    #[default]
    Running,
    /// Suspended at an approval node, waiting for a decision.
    PausedForApproval,
    /// Every node finished and no failure or quality rejection occurred.
    Completed,
    /// At least one node failed.
    Failed,
    /// The quality gate rejected the result after the rerun budget ran out.
    FailedQuality,
    /// Cancelled by the caller.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::FailedQuality | Self::Cancelled
        )
    }

    /// Returns true if the status can be cancelled.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::PausedForApproval => write!(f, "paused_for_approval"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::FailedQuality => write!(f, "failed_quality"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
