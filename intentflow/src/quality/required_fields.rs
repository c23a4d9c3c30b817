//! A reference quality gate based on required output fields.

use super::{QualityAssessment, QualityGate, QualityRequest, RerunStrategy};
use crate::core::NodeErrorKind;
use crate::errors::CollaboratorError;
use crate::utils::lookup_path;
use async_trait::async_trait;

/// Scores a pass by required-field coverage and node success ratio.
///
/// - coverage: share of `required_fields` found (non-null) in at least one
///   successful result, or 1.0 when none are required
/// - success ratio: completed / (completed + failed), or 1.0 when nothing ran
///
/// The score is their product. Failed nodes that are not mere upstream
/// casualties are proposed for a partial rerun.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredFieldsQualityGate;

impl RequiredFieldsQualityGate {
    /// Creates the gate.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QualityGate for RequiredFieldsQualityGate {
    async fn evaluate(
        &self,
        request: &QualityRequest<'_>,
    ) -> Result<QualityAssessment, CollaboratorError> {
        let criteria = request.criteria;
        let successful: Vec<_> = request
            .completed_nodes
            .iter()
            .filter_map(|id| request.results.get(id))
            .filter_map(|r| r.result.as_ref())
            .collect();

        let missing: Vec<&String> = criteria
            .required_fields
            .iter()
            .filter(|field| {
                !successful
                    .iter()
                    .any(|value| lookup_path(value, field).is_some_and(|v| !v.is_null()))
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let coverage = if criteria.required_fields.is_empty() {
            1.0
        } else {
            (criteria.required_fields.len() - missing.len()) as f64
                / criteria.required_fields.len() as f64
        };

        let ran = request.completed_nodes.len() + request.failed_nodes.len();
        #[allow(clippy::cast_precision_loss)]
        let success_ratio = if ran == 0 {
            1.0
        } else {
            request.completed_nodes.len() as f64 / ran as f64
        };

        let score = coverage * success_ratio;
        let acceptable = score >= criteria.accuracy_threshold;

        let rerun_nodes: Vec<String> = request
            .failed_nodes
            .iter()
            .filter(|id| {
                request
                    .results
                    .get(*id)
                    .and_then(crate::core::NodeResult::error_kind)
                    != Some(NodeErrorKind::UpstreamFailure)
            })
            .cloned()
            .collect();

        let strategy = if rerun_nodes.is_empty() {
            RerunStrategy::Full
        } else {
            RerunStrategy::Partial
        };

        let mut assessment = QualityAssessment {
            quality_score: score,
            is_acceptable: acceptable,
            rerun_required: !acceptable,
            rerun_nodes,
            strategy,
            issues: Vec::new(),
        };
        for field in missing {
            assessment = assessment.with_issue(format!("required field '{field}' missing"));
        }
        for id in request.failed_nodes {
            assessment = assessment.with_issue(format!("node '{id}' failed"));
        }

        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NodeError, NodeResult};
    use crate::graph::IntentGraph;
    use crate::quality::QualityCriteria;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixture {
        results: HashMap<String, NodeResult>,
        completed: Vec<String>,
        failed: Vec<String>,
        graph: IntentGraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                results: HashMap::new(),
                completed: Vec::new(),
                failed: Vec::new(),
                graph: IntentGraph::new("g"),
            }
        }

        fn ok(mut self, id: &str, value: serde_json::Value) -> Self {
            self.results
                .insert(id.into(), NodeResult::success(id, value, 1, Utc::now()));
            self.completed.push(id.into());
            self
        }

        fn failed(mut self, id: &str) -> Self {
            self.results.insert(
                id.into(),
                NodeResult::failure(id, NodeError::new(NodeErrorKind::AgentError, "x"), 1, Utc::now()),
            );
            self.failed.push(id.into());
            self
        }

        fn upstream(mut self, id: &str, dep: &str) -> Self {
            self.results
                .insert(id.into(), NodeResult::upstream_failure(id, dep));
            self.failed.push(id.into());
            self
        }

        async fn assess(&self, fields: &[&str], threshold: f64) -> QualityAssessment {
            let criteria = QualityCriteria {
                required_fields: fields.iter().map(ToString::to_string).collect(),
                accuracy_threshold: threshold,
            };
            let request = QualityRequest {
                execution_id: "e",
                attempt: 0,
                results: &self.results,
                completed_nodes: &self.completed,
                failed_nodes: &self.failed,
                skipped_nodes: &[],
                criteria: &criteria,
                graph: &self.graph,
            };
            RequiredFieldsQualityGate::new().evaluate(&request).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_all_fields_present() {
        let assessment = Fixture::new()
            .ok("a", json!({"summary": "s"}))
            .ok("b", json!({"meta": {"lang": "en"}}))
            .assess(&["summary", "meta.lang"], 0.8)
            .await;

        assert!((assessment.quality_score - 1.0).abs() < f64::EPSILON);
        assert!(assessment.is_acceptable);
        assert!(!assessment.rerun_required);
    }

    #[tokio::test]
    async fn test_missing_field_lowers_score() {
        let assessment = Fixture::new()
            .ok("a", json!({"summary": "s"}))
            .assess(&["summary", "citations"], 0.8)
            .await;

        assert!((assessment.quality_score - 0.5).abs() < f64::EPSILON);
        assert!(assessment.rerun_required);
        assert_eq!(assessment.strategy, RerunStrategy::Full);
        assert_eq!(assessment.issues, vec!["required field 'citations' missing"]);
    }

    #[tokio::test]
    async fn test_failed_nodes_proposed_for_partial_rerun() {
        let assessment = Fixture::new()
            .ok("a", json!({}))
            .failed("b")
            .upstream("c", "b")
            .assess(&[], 0.9)
            .await;

        assert!((assessment.quality_score - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(assessment.rerun_nodes, vec!["b".to_string()]);
        assert_eq!(assessment.strategy, RerunStrategy::Partial);
    }
}
