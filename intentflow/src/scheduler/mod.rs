//! Ready-set computation and outcome propagation.
//!
//! A node is resolved once it is completed, failed or skipped. For a pending
//! node whose producers are all resolved, each incoming relation is judged:
//!
//! | producer  | plain      | value condition        | `on_failure` |
//! |-----------|------------|------------------------|--------------|
//! | completed | satisfied  | satisfied if it holds  | skip         |
//! | failed    | failure    | failure                | satisfied    |
//! | skipped   | skip       | skip                   | skip         |
//!
//! Any failure marks the node `UpstreamFailure`; otherwise any skip skips it;
//! otherwise it is ready.

use crate::core::NodeResult;
use crate::graph::{Incoming, ValidatedGraph};
use crate::state::ExecutionState;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
enum Outcome<'s> {
    Completed(Option<&'s Value>),
    Failed,
    Skipped,
}

/// How a pending node stands against its producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// All producers satisfied; may be dispatched.
    Ready,
    /// Some producer is unresolved.
    Waiting,
    /// A producer failed without an alternate path.
    UpstreamFailure {
        /// The failed producer.
        failed_dependency: String,
    },
    /// A branch into the node was not taken.
    Skip,
}

/// The result of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Nodes to dispatch, in topological order.
    pub ready: Vec<String>,
    /// Nodes to fail with `UpstreamFailure`, paired with the failed producer.
    pub upstream_failed: Vec<(String, String)>,
    /// Nodes to skip.
    pub skipped: Vec<String>,
}

impl SchedulePlan {
    /// Returns true if the pass changed nothing and dispatches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.upstream_failed.is_empty() && self.skipped.is_empty()
    }

    /// Writes the propagated failures and skips into the state.
    pub fn apply_resolutions(&self, state: &mut ExecutionState) {
        for (node_id, failed_dependency) in &self.upstream_failed {
            state.record_result(NodeResult::upstream_failure(node_id, failed_dependency));
        }
        for node_id in &self.skipped {
            state.record_skipped(node_id);
        }
    }
}

/// Computes what can run next for one execution.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler<'g> {
    graph: &'g ValidatedGraph,
}

impl<'g> Scheduler<'g> {
    /// Creates a scheduler over a validated graph.
    #[must_use]
    pub fn new(graph: &'g ValidatedGraph) -> Self {
        Self { graph }
    }

    fn outcomes<'s>(state: &'s ExecutionState) -> HashMap<&'s str, Outcome<'s>> {
        let mut outcomes = HashMap::with_capacity(
            state.completed_nodes.len() + state.failed_nodes.len() + state.skipped_nodes.len(),
        );
        for id in &state.completed_nodes {
            let value = state.results.get(id).and_then(|r| r.result.as_ref());
            outcomes.insert(id.as_str(), Outcome::Completed(value));
        }
        for id in &state.failed_nodes {
            outcomes.insert(id.as_str(), Outcome::Failed);
        }
        for id in &state.skipped_nodes {
            outcomes.insert(id.as_str(), Outcome::Skipped);
        }
        outcomes
    }

    fn judge(&self, incoming: &[Incoming], outcomes: &HashMap<&str, Outcome<'_>>) -> Readiness {
        let mut failed: Option<&str> = None;
        let mut skip = false;

        for relation in incoming {
            let Some(outcome) = outcomes.get(relation.from.as_str()) else {
                return Readiness::Waiting;
            };
            let on_failure = relation
                .condition
                .as_ref()
                .is_some_and(crate::graph::EdgeCondition::is_failure_path);

            match (outcome, &relation.condition) {
                (Outcome::Completed(_), _) if on_failure => skip = true,
                (Outcome::Completed(_), None) => {}
                (Outcome::Completed(value), Some(condition)) => {
                    if !self.graph.condition_holds(condition, *value) {
                        skip = true;
                    }
                }
                (Outcome::Failed, _) if on_failure => {}
                (Outcome::Failed, _) => {
                    failed.get_or_insert(relation.from.as_str());
                }
                (Outcome::Skipped, _) => skip = true,
            }
        }

        if let Some(dep) = failed {
            Readiness::UpstreamFailure {
                failed_dependency: dep.to_string(),
            }
        } else if skip {
            Readiness::Skip
        } else {
            Readiness::Ready
        }
    }

    /// Judges a single node against the current state.
    #[must_use]
    pub fn readiness(&self, node_id: &str, state: &ExecutionState) -> Readiness {
        self.judge(self.graph.predecessors(node_id), &Self::outcomes(state))
    }

    /// Plans the next step.
    ///
    /// Nodes in `in_flight` are treated as unresolved and never returned as
    /// ready. Failures and skips cascade within one pass, since nodes are
    /// visited in topological order.
    #[must_use]
    pub fn plan(&self, state: &ExecutionState, in_flight: &HashSet<String>) -> SchedulePlan {
        let mut outcomes = Self::outcomes(state);
        let mut plan = SchedulePlan::default();

        for id in self.graph.topological_order() {
            if outcomes.contains_key(id.as_str()) || in_flight.contains(id) {
                continue;
            }
            match self.judge(self.graph.predecessors(id), &outcomes) {
                Readiness::Ready => plan.ready.push(id.clone()),
                Readiness::Waiting => {}
                Readiness::UpstreamFailure { failed_dependency } => {
                    outcomes.insert(id.as_str(), Outcome::Failed);
                    plan.upstream_failed.push((id.clone(), failed_dependency));
                }
                Readiness::Skip => {
                    outcomes.insert(id.as_str(), Outcome::Skipped);
                    plan.skipped.push(id.clone());
                }
            }
        }

        plan
    }

    /// Nodes whose producers are all satisfied and that are not yet resolved.
    #[must_use]
    pub fn ready_nodes(&self, state: &ExecutionState) -> Vec<String> {
        self.plan(state, &HashSet::new()).ready
    }

    /// Returns true once every node is completed, failed or skipped.
    #[must_use]
    pub fn is_terminal(&self, state: &ExecutionState) -> bool {
        let outcomes = Self::outcomes(state);
        self.graph
            .topological_order()
            .iter()
            .all(|id| outcomes.contains_key(id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::core::{NodeError, NodeErrorKind};
    use crate::graph::{Edge, EdgeCondition, GraphValidator, IntentGraph, Node};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    fn node(id: &str, deps: &[&str]) -> Node {
        Node::new(id, "agent", "tool").with_dependencies(deps.iter().copied())
    }

    fn state_for(graph: &IntentGraph) -> ExecutionState {
        ExecutionState::new("e", graph.clone(), ExecutionConfig::default(), Map::new())
    }

    fn ok(state: &mut ExecutionState, id: &str, value: Value) {
        state.record_result(NodeResult::success(id, value, 1, Utc::now()));
    }

    fn fail(state: &mut ExecutionState, id: &str) {
        state.record_result(NodeResult::failure(
            id,
            NodeError::new(NodeErrorKind::AgentError, "boom"),
            1,
            Utc::now(),
        ));
    }

    #[test]
    fn test_roots_ready_first() {
        let graph = IntentGraph::new("g")
            .with_node(node("a", &[]))
            .with_node(node("b", &[]))
            .with_node(node("c", &["a", "b"]));
        let validated = GraphValidator::validate(&graph).unwrap();
        let scheduler = Scheduler::new(&validated);
        let mut state = state_for(&graph);

        assert_eq!(scheduler.ready_nodes(&state), vec!["a", "b"]);

        ok(&mut state, "a", json!(1));
        assert_eq!(scheduler.ready_nodes(&state), vec!["b"]);

        ok(&mut state, "b", json!(2));
        assert_eq!(scheduler.ready_nodes(&state), vec!["c"]);
        assert!(!scheduler.is_terminal(&state));
    }

    #[test]
    fn test_in_flight_excluded() {
        let graph = IntentGraph::new("g").with_node(node("a", &[]));
        let validated = GraphValidator::validate(&graph).unwrap();
        let state = state_for(&graph);

        let in_flight: HashSet<String> = ["a".to_string()].into();
        assert!(Scheduler::new(&validated).plan(&state, &in_flight).is_empty());
    }

    #[test]
    fn test_failure_cascades_in_one_pass() {
        let graph = IntentGraph::new("g")
            .with_node(node("a", &[]))
            .with_node(node("b", &["a"]))
            .with_node(node("c", &["b"]))
            .with_node(node("d", &[]));
        let validated = GraphValidator::validate(&graph).unwrap();
        let mut state = state_for(&graph);
        fail(&mut state, "a");

        let plan = Scheduler::new(&validated).plan(&state, &HashSet::new());

        assert_eq!(plan.ready, vec!["d"]);
        assert_eq!(
            plan.upstream_failed,
            vec![("b".to_string(), "a".to_string()), ("c".to_string(), "b".to_string())]
        );

        plan.apply_resolutions(&mut state);
        assert_eq!(state.failed_nodes, vec!["a", "b", "c"]);
        assert_eq!(state.results["c"].error_kind(), Some(NodeErrorKind::UpstreamFailure));
    }

    #[test]
    fn test_conditional_edge_skips_and_propagates() {
        let graph = IntentGraph::new("g")
            .with_node(node("classify", &[]))
            .with_node(node("escalate", &[]))
            .with_node(node("notify", &["escalate"]))
            .with_edge(Edge::conditional(
                "classify",
                "escalate",
                EdgeCondition::Equals {
                    field: "label".into(),
                    value: json!("urgent"),
                },
            ));
        let validated = GraphValidator::validate(&graph).unwrap();
        let scheduler = Scheduler::new(&validated);
        let mut state = state_for(&graph);
        ok(&mut state, "classify", json!({"label": "routine"}));

        let plan = scheduler.plan(&state, &HashSet::new());
        assert_eq!(plan.skipped, vec!["escalate", "notify"]);
        assert!(plan.ready.is_empty());

        plan.apply_resolutions(&mut state);
        assert!(scheduler.is_terminal(&state));
    }

    #[test]
    fn test_on_failure_edge_is_alternate_path() {
        let graph = IntentGraph::new("g")
            .with_node(node("primary", &[]))
            .with_node(node("fallback", &[]))
            .with_edge(Edge::conditional("primary", "fallback", EdgeCondition::OnFailure));
        let validated = GraphValidator::validate(&graph).unwrap();
        let scheduler = Scheduler::new(&validated);

        let mut failed = state_for(&graph);
        fail(&mut failed, "primary");
        assert_eq!(scheduler.readiness("fallback", &failed), Readiness::Ready);

        let mut succeeded = state_for(&graph);
        ok(&mut succeeded, "primary", json!({}));
        assert_eq!(scheduler.readiness("fallback", &succeeded), Readiness::Skip);
    }

    #[test]
    fn test_failure_beats_skip() {
        let graph = IntentGraph::new("g")
            .with_node(node("a", &[]))
            .with_node(node("b", &[]))
            .with_node(node("c", &["a", "b"]))
            .with_edge(Edge::conditional(
                "b",
                "c",
                EdgeCondition::Truthy { field: "go".into() },
            ));
        let validated = GraphValidator::validate(&graph).unwrap();
        let mut state = state_for(&graph);
        fail(&mut state, "a");
        ok(&mut state, "b", json!({"go": false}));

        assert!(matches!(
            Scheduler::new(&validated).readiness("c", &state),
            Readiness::UpstreamFailure { ref failed_dependency } if failed_dependency == "a"
        ));
    }

    #[test]
    fn test_approval_branches() {
        let graph = IntentGraph::new("g")
            .with_node(Node::approval("h", "Ship it?").on_approve(["ship"]).on_reject(["rollback"]))
            .with_node(node("ship", &[]))
            .with_node(node("rollback", &[]));
        let validated = GraphValidator::validate(&graph).unwrap();
        let mut state = state_for(&graph);
        ok(&mut state, "h", json!({"approved": true, "modified_context": null}));

        let plan = Scheduler::new(&validated).plan(&state, &HashSet::new());
        assert_eq!(plan.ready, vec!["ship"]);
        assert_eq!(plan.skipped, vec!["rollback"]);
    }
}
