//! Post-execution quality validation and rerun planning.
//!
//! Once every node is resolved, the engine hands the pass to a [`QualityGate`]
//! and feeds the [`QualityAssessment`] to [`plan_rerun`]. The loop driving
//! reruns lives in the engine and is strictly iterative.

mod required_fields;

pub use required_fields::RequiredFieldsQualityGate;

use crate::config::QualityRequirements;
use crate::core::NodeResult;
use crate::errors::CollaboratorError;
use crate::graph::IntentGraph;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// How much of the graph a rerun covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunStrategy {
    /// Only the flagged nodes and their downstream closure.
    Partial,
    /// The entire graph.
    Full,
    /// Let the gate pick per pass.
    #[default]
    Adaptive,
    /// Never rerun; accept whatever the pass produced.
    None,
}

impl fmt::Display for RerunStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial => write!(f, "partial"),
            Self::Full => write!(f, "full"),
            Self::Adaptive => write!(f, "adaptive"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Criteria passed to the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCriteria {
    /// Fields expected somewhere in the successful results.
    pub required_fields: Vec<String>,
    /// Minimum acceptable score.
    pub accuracy_threshold: f64,
}

/// What the gate sees of a finished pass.
#[derive(Debug, Clone, Serialize)]
pub struct QualityRequest<'a> {
    /// The execution being assessed.
    pub execution_id: &'a str,
    /// Reruns already performed.
    pub attempt: u32,
    /// Per-node results of the pass.
    pub results: &'a HashMap<String, NodeResult>,
    /// Nodes that succeeded.
    pub completed_nodes: &'a [String],
    /// Nodes that failed.
    pub failed_nodes: &'a [String],
    /// Nodes on untaken branches.
    pub skipped_nodes: &'a [String],
    /// The criteria to apply.
    pub criteria: &'a QualityCriteria,
    /// The graph that was executed.
    pub graph: &'a IntentGraph,
}

/// The gate's verdict on one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Score in `[0, 1]`.
    pub quality_score: f64,
    /// Whether the gate considers the output acceptable.
    pub is_acceptable: bool,
    /// Whether another pass is requested.
    pub rerun_required: bool,
    /// Nodes to rerun for a partial pass.
    #[serde(default)]
    pub rerun_nodes: Vec<String>,
    /// Suggested rerun strategy.
    #[serde(default)]
    pub strategy: RerunStrategy,
    /// Human-readable findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl QualityAssessment {
    /// An acceptable assessment with the given score.
    #[must_use]
    pub fn accept(quality_score: f64) -> Self {
        Self {
            quality_score,
            is_acceptable: true,
            rerun_required: false,
            rerun_nodes: Vec::new(),
            strategy: RerunStrategy::None,
            issues: Vec::new(),
        }
    }

    /// An unacceptable assessment asking for a rerun.
    #[must_use]
    pub fn rerun(quality_score: f64, strategy: RerunStrategy, rerun_nodes: Vec<String>) -> Self {
        Self {
            quality_score,
            is_acceptable: false,
            rerun_required: true,
            rerun_nodes,
            strategy,
            issues: Vec::new(),
        }
    }

    /// Adds a finding.
    #[must_use]
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    /// True when the gate accepted the pass and the score clears `threshold`.
    #[must_use]
    pub fn passes(&self, threshold: f64) -> bool {
        self.is_acceptable && self.quality_score >= threshold
    }
}

/// Scores a finished pass.
#[async_trait]
pub trait QualityGate: Send + Sync + fmt::Debug {
    /// Assesses the pass.
    async fn evaluate(
        &self,
        request: &QualityRequest<'_>,
    ) -> Result<QualityAssessment, CollaboratorError>;
}

/// Which nodes a rerun resets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunPlan {
    /// These roots; the engine extends them with their downstream closure.
    Partial(BTreeSet<String>),
    /// Everything.
    Full,
}

/// What to do after an assessment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityDecision {
    /// Finalize with the current results.
    Accept,
    /// Run another pass.
    Rerun(RerunPlan),
    /// Finalize as `failed_quality`.
    Reject,
}

/// Decides between accepting, rerunning and rejecting a pass.
///
/// `attempt_count` is the number of reruns already performed; a rerun is only
/// planned while it is below `max_rerun_attempts`. Only a configured
/// [`RerunStrategy::None`] opts out of reruns and the threshold check. Under
/// [`RerunStrategy::Adaptive`] the gate may ask for `partial` or `full`; any
/// other answer becomes partial when nodes are named and full otherwise.
#[must_use]
pub fn plan_rerun(
    assessment: &QualityAssessment,
    requirements: &QualityRequirements,
    attempt_count: u32,
) -> QualityDecision {
    if requirements.rerun_strategy == RerunStrategy::None {
        return QualityDecision::Accept;
    }

    if assessment.rerun_required && attempt_count < requirements.max_rerun_attempts {
        let roots: BTreeSet<String> = assessment.rerun_nodes.iter().cloned().collect();
        let strategy = match requirements.rerun_strategy {
            RerunStrategy::Adaptive => assessment.strategy,
            configured => configured,
        };
        let plan = match strategy {
            RerunStrategy::Full => RerunPlan::Full,
            _ if roots.is_empty() => RerunPlan::Full,
            _ => RerunPlan::Partial(roots),
        };
        return QualityDecision::Rerun(plan);
    }

    if assessment.passes(requirements.accuracy_threshold) {
        QualityDecision::Accept
    } else {
        QualityDecision::Reject
    }
}
