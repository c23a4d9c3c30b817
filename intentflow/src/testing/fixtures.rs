//! Graph fixtures.

use crate::graph::{IntentGraph, Node};
use serde_json::json;

/// Agent name used by fixture nodes.
pub const TEST_AGENT: &str = "test-agent";

/// Creates a standard fixture node.
#[must_use]
pub fn test_node(id: &str) -> Node {
    Node::new(id, TEST_AGENT, "run").with_input(json!({"step": id}))
}

/// A chain where each node depends on the previous one.
#[must_use]
pub fn linear_graph(ids: &[&str]) -> IntentGraph {
    let mut graph = IntentGraph::new("linear");
    let mut previous: Option<&str> = None;
    for id in ids {
        let mut node = test_node(id);
        if let Some(dep) = previous {
            node = node.with_dependency(dep);
        }
        graph = graph.with_node(node);
        previous = Some(id);
    }
    graph
}

/// `root` fanning out to `branch_0..width` which all feed `join`.
#[must_use]
pub fn fan_out_graph(width: usize) -> IntentGraph {
    let branches: Vec<String> = (0..width).map(|i| format!("branch_{i}")).collect();
    let mut graph = IntentGraph::new("fan-out").with_node(test_node("root"));
    for branch in &branches {
        graph = graph.with_node(test_node(branch).with_dependency("root"));
    }
    graph.with_node(test_node("join").with_dependencies(branches))
}

/// `prepare -> approve`, then `publish` on approval or `discard` on rejection.
#[must_use]
pub fn approval_graph() -> IntentGraph {
    IntentGraph::new("approval")
        .with_node(test_node("prepare"))
        .with_node(
            Node::approval("approve", "Publish the prepared report")
                .with_dependency("prepare")
                .on_approve(["publish"])
                .on_reject(["discard"]),
        )
        .with_node(test_node("publish"))
        .with_node(test_node("discard"))
}
