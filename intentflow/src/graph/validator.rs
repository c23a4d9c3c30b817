//! Graph validation and resolution.
//!
//! [`GraphValidator::validate`] is a pure function over an [`IntentGraph`]. On
//! success it returns a [`ValidatedGraph`] in which every node has been
//! resolved once into a [`NodeKind`] and adjacency has been precomputed, so the
//! scheduler never re-inspects raw node fields.

use super::{ApprovalOptions, EdgeCondition, IntentGraph, Node};
use crate::errors::GraphValidationError;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// What executing a node means.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Dispatched to an agent.
    Standard {
        /// Agent name.
        agent: String,
        /// Tool name.
        tool: String,
    },
    /// Suspends the execution until a human decides.
    Approval(ApprovalSpec),
}

/// A resolved approval node.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalSpec {
    /// Approval settings.
    pub options: ApprovalOptions,
    /// Targets enabled by approval.
    pub next_on_approve: Vec<String>,
    /// Targets enabled by rejection.
    pub next_on_reject: Vec<String>,
}

/// An incoming relation of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    /// The producing node.
    pub from: String,
    /// Condition on the producer; `None` requires plain success.
    pub condition: Option<EdgeCondition>,
}

/// A graph that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    graph: Arc<IntentGraph>,
    index: HashMap<String, usize>,
    kinds: HashMap<String, NodeKind>,
    predecessors: HashMap<String, Vec<Incoming>>,
    successors: HashMap<String, BTreeSet<String>>,
    topological_order: Vec<String>,
    patterns: HashMap<String, Regex>,
}

impl ValidatedGraph {
    /// Evaluates an incoming relation's condition with the precompiled patterns.
    #[must_use]
    pub fn condition_holds(&self, condition: &EdgeCondition, result: Option<&Value>) -> bool {
        let compiled = condition.pattern().and_then(|p| self.patterns.get(p));
        condition.evaluate_with(result, compiled)
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &IntentGraph {
        &self.graph
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.nodes.len()
    }

    /// Returns true if the graph has no nodes (never true after validation).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.nodes.is_empty()
    }

    /// Returns true if the id names a node.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.graph.nodes[i])
    }

    /// Returns the resolved kind of a node.
    #[must_use]
    pub fn kind(&self, id: &str) -> Option<&NodeKind> {
        self.kinds.get(id)
    }

    /// Returns true if the node is an approval node.
    #[must_use]
    pub fn is_approval(&self, id: &str) -> bool {
        matches!(self.kinds.get(id), Some(NodeKind::Approval(_)))
    }

    /// Returns the incoming relations of a node.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> &[Incoming] {
        self.predecessors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Returns the direct dependents of a node.
    pub fn successors(&self, id: &str) -> impl Iterator<Item = &str> {
        self.successors
            .get(id)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Returns node ids in a dependency-respecting order.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    /// Returns the given nodes plus everything transitively downstream of them.
    ///
    /// Unknown ids are ignored.
    #[must_use]
    pub fn downstream_closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<&str> = roots.into_iter().filter(|r| self.contains(r)).collect();

        while let Some(id) = queue.pop_front() {
            if closure.insert(id.to_string()) {
                queue.extend(self.successors(id));
            }
        }

        closure
    }

    /// Groups nodes by dependency depth; nodes in one group never depend on each other.
    #[must_use]
    pub fn parallel_groups(&self) -> Vec<Vec<String>> {
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();

        for id in &self.topological_order {
            let depth = self
                .predecessors(id)
                .iter()
                .filter_map(|inc| level.get(inc.from.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            level.insert(id, depth);
            if groups.len() <= depth {
                groups.resize_with(depth + 1, Vec::new);
            }
            groups[depth].push(id.clone());
        }

        for group in &mut groups {
            group.sort();
        }
        groups
    }
}

/// Checks that a graph is a well-formed DAG.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphValidator;

impl GraphValidator {
    /// Validates and resolves a graph.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an empty graph, a duplicate id, a
    /// malformed approval node, a dangling reference, or a cycle.
    pub fn validate(graph: &IntentGraph) -> Result<ValidatedGraph, GraphValidationError> {
        if graph.nodes.is_empty() {
            return Err(GraphValidationError::EmptyGraph(graph.graph_id.clone()));
        }

        let mut index = HashMap::with_capacity(graph.nodes.len());
        for (i, node) in graph.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphValidationError::DuplicateNode(node.id.clone()));
            }
        }

        let mut kinds = HashMap::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            kinds.insert(node.id.clone(), resolve_kind(node)?);
        }

        check_references(graph, &index)?;

        let mut predecessors: HashMap<String, Vec<Incoming>> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Vec::new()))
            .collect();
        let mut successors: HashMap<String, BTreeSet<String>> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), BTreeSet::new()))
            .collect();

        let mut link = |from: &str, to: &str, condition: Option<EdgeCondition>| {
            if let Some(incoming) = predecessors.get_mut(to) {
                let relation = Incoming {
                    from: from.to_string(),
                    condition,
                };
                if !incoming.contains(&relation) {
                    incoming.push(relation);
                }
            }
            if let Some(out) = successors.get_mut(from) {
                out.insert(to.to_string());
            }
        };

        for edge in &graph.edges {
            link(&edge.from, &edge.to, edge.condition.clone());
        }
        for node in &graph.nodes {
            if let Some(NodeKind::Approval(spec)) = kinds.get(&node.id) {
                for target in &spec.next_on_approve {
                    link(&node.id, target, Some(EdgeCondition::approved()));
                }
                for target in &spec.next_on_reject {
                    link(&node.id, target, Some(EdgeCondition::rejected()));
                }
            }
        }

        // A plain dependency is refined by any explicit edge for the same pair.
        for node in &graph.nodes {
            for dep in &node.dependencies {
                let incoming = predecessors.entry(node.id.clone()).or_default();
                if !incoming.iter().any(|inc| &inc.from == dep) {
                    incoming.push(Incoming {
                        from: dep.clone(),
                        condition: None,
                    });
                }
                successors.entry(dep.clone()).or_default().insert(node.id.clone());
            }
        }

        let patterns = compile_patterns(graph, &predecessors)?;

        let declared: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let topological_order = topological_order(&declared, &successors)?;

        Ok(ValidatedGraph {
            graph: Arc::new(graph.clone()),
            index,
            kinds,
            predecessors,
            successors,
            topological_order,
            patterns,
        })
    }
}

fn resolve_kind(node: &Node) -> Result<NodeKind, GraphValidationError> {
    if !node.is_approval() {
        return Ok(NodeKind::Standard {
            agent: node.agent.clone(),
            tool: node.tool.clone(),
        });
    }

    let options = node.approval_options.clone().unwrap_or_default();
    let mut missing = Vec::new();
    if node.next_on_approve.is_none() {
        missing.push("next_on_approve");
    }
    if node.next_on_reject.is_none() {
        missing.push("next_on_reject");
    }
    if !missing.is_empty() && !options.fallthrough {
        return Err(GraphValidationError::MalformedApprovalNode {
            node: node.id.clone(),
            missing: missing.join(" and "),
        });
    }

    Ok(NodeKind::Approval(ApprovalSpec {
        next_on_approve: node.next_on_approve.clone().unwrap_or_default(),
        next_on_reject: node.next_on_reject.clone().unwrap_or_default(),
        options,
    }))
}

/// Compiles every `matches` pattern once, in declaration order of the consumers.
fn compile_patterns(
    graph: &IntentGraph,
    predecessors: &HashMap<String, Vec<Incoming>>,
) -> Result<HashMap<String, Regex>, GraphValidationError> {
    let mut patterns = HashMap::new();
    for node in &graph.nodes {
        let Some(incoming) = predecessors.get(&node.id) else {
            continue;
        };
        for relation in incoming {
            let Some(pattern) = relation.condition.as_ref().and_then(EdgeCondition::pattern) else {
                continue;
            };
            if patterns.contains_key(pattern) {
                continue;
            }
            let re = Regex::new(pattern).map_err(|e| GraphValidationError::InvalidCondition {
                from: relation.from.clone(),
                to: node.id.clone(),
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            patterns.insert(pattern.to_string(), re);
        }
    }
    Ok(patterns)
}

fn check_references(
    graph: &IntentGraph,
    index: &HashMap<String, usize>,
) -> Result<(), GraphValidationError> {
    let check = |node: &str, reference: &str, field: &'static str| {
        if index.contains_key(reference) {
            Ok(())
        } else {
            Err(GraphValidationError::DanglingReference {
                node: node.to_string(),
                reference: reference.to_string(),
                field,
            })
        }
    };

    for node in &graph.nodes {
        for dep in &node.dependencies {
            check(&node.id, dep, "dependencies")?;
        }
        for target in node.next_on_approve.iter().flatten() {
            check(&node.id, target, "next_on_approve")?;
        }
        for target in node.next_on_reject.iter().flatten() {
            check(&node.id, target, "next_on_reject")?;
        }
    }

    for edge in &graph.edges {
        check(&edge.from, &edge.from, "edges.from")?;
        check(&edge.from, &edge.to, "edges.to")?;
    }

    if let Some(plan) = &graph.execution_plan {
        for id in plan.parallel_groups.iter().flatten() {
            check(&graph.graph_id, id, "execution_plan.parallel_groups")?;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Depth-first traversal with white/gray/black marking.
///
/// Uses an explicit stack so deep graphs cannot overflow the call stack. A
/// successor that is still gray is a back-edge and therefore a cycle.
///
/// Roots and children are visited in reverse so that the reversed postorder
/// keeps independent nodes in declaration order.
fn topological_order(
    declared: &[&str],
    successors: &HashMap<String, BTreeSet<String>>,
) -> Result<Vec<String>, GraphValidationError> {
    let mut color: HashMap<&str, Color> = declared.iter().map(|id| (*id, Color::White)).collect();
    let mut finished: Vec<String> = Vec::with_capacity(declared.len());
    let empty = BTreeSet::new();

    for &root in declared.iter().rev() {
        if color.get(root) != Some(&Color::White) {
            continue;
        }

        let mut stack = vec![(root, successors.get(root).unwrap_or(&empty).iter().rev())];
        color.insert(root, Color::Gray);

        loop {
            let next = match stack.last_mut() {
                Some((_, children)) => children.next(),
                None => break,
            };

            match next {
                Some(child) => match color.get(child.as_str()).copied().unwrap_or(Color::Black) {
                    Color::White => {
                        color.insert(child.as_str(), Color::Gray);
                        let grandchildren = successors.get(child).unwrap_or(&empty).iter().rev();
                        stack.push((child.as_str(), grandchildren));
                    }
                    Color::Gray => {
                        let start = stack
                            .iter()
                            .position(|(id, _)| *id == child.as_str())
                            .unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(id, _)| (*id).to_string()).collect();
                        path.push(child.clone());
                        return Err(GraphValidationError::CycleDetected {
                            node: child.clone(),
                            path,
                        });
                    }
                    Color::Black => {}
                },
                None => {
                    if let Some((id, _)) = stack.pop() {
                        color.insert(id, Color::Black);
                        finished.push(id.to_string());
                    }
                }
            }
        }
    }

    finished.reverse();
    Ok(finished)
}
