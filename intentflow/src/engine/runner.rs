//! The drive loop behind [`ExecutionEngine`].
//!
//! One pass dispatches ready nodes until the graph is resolved, an approval
//! node is reached while nothing is in flight, or the execution is cancelled.
//! Resolved passes go through the quality gate, which may reset part or all of
//! the graph for another pass. Reruns are loop iterations, not recursion, and are
//! bounded by `max_rerun_attempts`.

use super::ExecutionEngine;
use crate::cancellation::CancellationToken;
use crate::config::QualityRequirements;
use crate::core::{ExecutionStatus, NodeError, NodeErrorKind, NodeResult};
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::executor::{resolve_input, NodeExecutor, NodeInvocation};
use crate::graph::{NodeKind, ValidatedGraph};
use crate::quality::{
    plan_rerun, QualityAssessment, QualityDecision, QualityRequest, RerunPlan, RerunStrategy,
};
use crate::scheduler::{SchedulePlan, Scheduler};
use crate::state::ExecutionState;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

type InFlight = FuturesUnordered<BoxFuture<'static, (String, Result<NodeResult, JoinError>)>>;

enum PassOutcome {
    Resolved,
    Paused,
    Cancelled,
}

impl ExecutionEngine {
    /// Drives `state` with a registered cancellation token.
    pub(super) async fn run(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
    ) -> Result<(), EngineError> {
        let token = Arc::new(CancellationToken::new());
        self.active
            .insert(state.execution_id.clone(), Arc::clone(&token));

        let outcome = self.drive(graph, state, &token).await;
        self.active.remove(&state.execution_id);

        if let Err(e) = &outcome {
            error!(execution_id = %state.execution_id, error = %e, "Execution aborted");
        }
        outcome
    }

    async fn drive(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        loop {
            match self.run_pass(graph, state, token).await? {
                PassOutcome::Paused => return Ok(()),
                PassOutcome::Cancelled => {
                    self.finish_cancelled(state, token).await;
                    return Ok(());
                }
                PassOutcome::Resolved => {}
            }

            let requirements = state.config.quality_requirements.clone();
            let Some(assessment) = self.assess(state, graph, &requirements).await else {
                self.finish(state, None).await;
                return Ok(());
            };

            match plan_rerun(&assessment, &requirements, state.attempt_count) {
                QualityDecision::Accept => {
                    self.finish(state, None).await;
                    return Ok(());
                }
                QualityDecision::Reject => {
                    self.finish(state, Some(ExecutionStatus::FailedQuality)).await;
                    return Ok(());
                }
                QualityDecision::Rerun(plan) => self.prepare_rerun(graph, state, plan).await,
            }
        }
    }

    async fn run_pass(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
        token: &CancellationToken,
    ) -> Result<PassOutcome, EngineError> {
        let scheduler = Scheduler::new(graph);
        let executor = NodeExecutor::new(Arc::clone(&self.agent), state.config.retry.clone());
        let max_parallel = state.config.max_parallel.max(1);
        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut running: HashMap<String, AbortHandle> = HashMap::new();

        loop {
            if token.is_cancelled() {
                self.drain(state, &mut in_flight, &mut running).await;
                return Ok(PassOutcome::Cancelled);
            }

            let in_flight_ids: HashSet<String> = running.keys().cloned().collect();
            let plan = scheduler.plan(state, &in_flight_ids);
            if !plan.upstream_failed.is_empty() || !plan.skipped.is_empty() {
                self.apply_resolutions(state, &plan).await;
            }

            let mut approval: Option<&str> = None;
            for node_id in &plan.ready {
                if graph.is_approval(node_id) {
                    approval.get_or_insert(node_id.as_str());
                    continue;
                }
                if running.len() >= max_parallel {
                    continue;
                }
                self.dispatch(graph, state, &executor, node_id, &mut in_flight, &mut running)
                    .await?;
            }

            if in_flight.is_empty() {
                if let Some(node_id) = approval {
                    self.pause_at(graph, state, node_id).await?;
                    return Ok(PassOutcome::Paused);
                }
                if scheduler.is_terminal(state) {
                    return Ok(PassOutcome::Resolved);
                }
                return Err(EngineError::Internal(format!(
                    "execution '{}' stalled with unresolved nodes",
                    state.execution_id
                )));
            }

            tokio::select! {
                biased;
                () = token.cancelled() => {}
                Some((node_id, joined)) = in_flight.next() => {
                    running.remove(&node_id);
                    self.record(state, &node_id, joined).await;
                }
            }
        }
    }

    async fn apply_resolutions(&self, state: &mut ExecutionState, plan: &SchedulePlan) {
        plan.apply_resolutions(state);

        for (node_id, failed_dependency) in &plan.upstream_failed {
            debug!(
                execution_id = %state.execution_id,
                node_id = %node_id,
                failed_dependency = %failed_dependency,
                "Node failed upstream"
            );
            if let Some(error) = state.results.get(node_id).and_then(|r| r.error.as_ref()) {
                self.events
                    .emit(EngineEvent::node_failed(&state.execution_id, node_id, error))
                    .await;
            }
        }
        for node_id in &plan.skipped {
            debug!(execution_id = %state.execution_id, node_id = %node_id, "Node skipped");
            self.events
                .emit(EngineEvent::node_skipped(&state.execution_id, node_id))
                .await;
        }

        self.persist(state).await;
    }

    async fn dispatch(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
        executor: &NodeExecutor,
        node_id: &str,
        in_flight: &mut InFlight,
        running: &mut HashMap<String, AbortHandle>,
    ) -> Result<(), EngineError> {
        let Some(node) = graph.node(node_id) else {
            return Err(EngineError::Internal(format!("unknown node '{node_id}'")));
        };

        let invocation = NodeInvocation::for_node(
            node,
            graph.graph(),
            &state.config.retry,
            state.config.default_timeout_ms,
        );
        let input = resolve_input(&node.input, &state.results, &state.context);
        state.current_node = Some(node_id.to_string());

        debug!(execution_id = %state.execution_id, node_id = %node_id, "Dispatching node");
        self.events
            .emit(EngineEvent::node_started(&state.execution_id, node_id))
            .await;

        let executor = executor.clone();
        let handle = tokio::spawn(async move { executor.execute(&invocation, input).await });
        running.insert(node_id.to_string(), handle.abort_handle());

        let id = node_id.to_string();
        in_flight.push(async move { (id, handle.await) }.boxed());
        Ok(())
    }

    async fn record(
        &self,
        state: &mut ExecutionState,
        node_id: &str,
        joined: Result<NodeResult, JoinError>,
    ) {
        let result = joined.unwrap_or_else(|e| {
            NodeResult::failure(
                node_id,
                NodeError::new(NodeErrorKind::AgentError, format!("node task failed: {e}")),
                0,
                Utc::now(),
            )
        });

        let event = match &result.error {
            Some(error) => {
                warn!(
                    execution_id = %state.execution_id,
                    node_id = %node_id,
                    error = %error,
                    attempts = result.attempts,
                    "Node failed"
                );
                EngineEvent::node_failed(&state.execution_id, node_id, error)
            }
            None => {
                debug!(
                    execution_id = %state.execution_id,
                    node_id = %node_id,
                    duration_ms = result.execution_time_ms,
                    "Node completed"
                );
                EngineEvent::node_completed(
                    &state.execution_id,
                    node_id,
                    result.execution_time_ms,
                    result.attempts,
                )
            }
        };

        state.record_result(result);
        self.events.emit(event).await;
        self.persist(state).await;
    }

    /// Waits up to the cancel grace period for in-flight nodes, then aborts the rest.
    async fn drain(
        &self,
        state: &mut ExecutionState,
        in_flight: &mut InFlight,
        running: &mut HashMap<String, AbortHandle>,
    ) {
        if in_flight.is_empty() {
            return;
        }

        let deadline = tokio::time::sleep(state.config.cancel_grace());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                next = in_flight.next() => match next {
                    Some((node_id, joined)) => {
                        running.remove(&node_id);
                        if !matches!(&joined, Err(e) if e.is_cancelled()) {
                            self.record(state, &node_id, joined).await;
                        }
                    }
                    None => break,
                },
                () = &mut deadline => {
                    for (node_id, handle) in running.drain() {
                        warn!(
                            execution_id = %state.execution_id,
                            node_id = %node_id,
                            "Aborting in-flight node after cancel grace period"
                        );
                        handle.abort();
                    }
                    break;
                }
            }
        }
    }

    async fn pause_at(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
        node_id: &str,
    ) -> Result<(), EngineError> {
        let Some(NodeKind::Approval(spec)) = graph.kind(node_id) else {
            return Err(EngineError::Internal(format!(
                "node '{node_id}' is not an approval node"
            )));
        };

        self.hitl
            .pause(state, node_id, spec, self.store.as_ref(), self.notifier.as_ref())
            .await?;
        self.events
            .emit(EngineEvent::execution_paused(
                &state.execution_id,
                node_id,
                &spec.options.action_description,
            ))
            .await;
        Ok(())
    }

    async fn assess(
        &self,
        state: &mut ExecutionState,
        graph: &ValidatedGraph,
        requirements: &QualityRequirements,
    ) -> Option<QualityAssessment> {
        if !requirements.enabled {
            return None;
        }
        let Some(gate) = &self.quality_gate else {
            warn!(
                execution_id = %state.execution_id,
                "Quality checks enabled but no quality gate configured"
            );
            return None;
        };

        let criteria = requirements.criteria();
        let evaluated = {
            let request = QualityRequest {
                execution_id: &state.execution_id,
                attempt: state.attempt_count,
                results: &state.results,
                completed_nodes: &state.completed_nodes,
                failed_nodes: &state.failed_nodes,
                skipped_nodes: &state.skipped_nodes,
                criteria: &criteria,
                graph: graph.graph(),
            };
            gate.evaluate(&request).await
        };

        match evaluated {
            Ok(assessment) => {
                info!(
                    execution_id = %state.execution_id,
                    attempt = state.attempt_count,
                    quality_score = assessment.quality_score,
                    is_acceptable = assessment.is_acceptable,
                    rerun_required = assessment.rerun_required,
                    "Quality evaluated"
                );
                self.events
                    .emit(EngineEvent::quality_evaluated(
                        &state.execution_id,
                        state.attempt_count,
                        &assessment,
                    ))
                    .await;
                state.record_quality(assessment.clone());
                Some(assessment)
            }
            Err(e) => {
                warn!(
                    execution_id = %state.execution_id,
                    error = %e,
                    "Quality gate failed, finishing without rerun"
                );
                None
            }
        }
    }

    async fn prepare_rerun(
        &self,
        graph: &ValidatedGraph,
        state: &mut ExecutionState,
        plan: RerunPlan,
    ) {
        state.attempt_count += 1;

        let (strategy, nodes) = match plan {
            RerunPlan::Partial(roots) => {
                let closure = graph.downstream_closure(roots.iter().map(String::as_str));
                if closure.is_empty() {
                    state.reset_all();
                    (RerunStrategy::Full, graph.topological_order().to_vec())
                } else {
                    state.reset_nodes(closure.iter());
                    (RerunStrategy::Partial, closure.into_iter().collect())
                }
            }
            RerunPlan::Full => {
                state.reset_all();
                (RerunStrategy::Full, graph.topological_order().to_vec())
            }
        };

        info!(
            execution_id = %state.execution_id,
            attempt = state.attempt_count,
            strategy = %strategy,
            nodes = nodes.len(),
            "Rerunning execution"
        );
        self.events
            .emit(EngineEvent::execution_rerun(
                &state.execution_id,
                state.attempt_count,
                strategy,
                &nodes,
            ))
            .await;
        self.persist(state).await;
    }

    async fn finish(&self, state: &mut ExecutionState, forced: Option<ExecutionStatus>) {
        let status = forced.unwrap_or(if state.failed_nodes.is_empty() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        });

        state.status = status;
        state.current_node = None;
        state.error = match status {
            ExecutionStatus::FailedQuality => Some(match &state.quality {
                Some(q) => format!(
                    "quality score {:.2} below threshold {:.2} after {} rerun(s)",
                    q.quality_score,
                    state.config.quality_requirements.accuracy_threshold,
                    state.attempt_count
                ),
                None => "quality requirements not met".to_string(),
            }),
            ExecutionStatus::Failed => Some(format!(
                "{} node(s) failed: {}",
                state.failed_nodes.len(),
                state.failed_nodes.join(", ")
            )),
            _ => None,
        };
        state.touch();

        let duration_ms = u64::try_from((state.updated_at - state.created_at).num_milliseconds())
            .unwrap_or(0);
        info!(
            execution_id = %state.execution_id,
            status = %status,
            completed = state.completed_nodes.len(),
            failed = state.failed_nodes.len(),
            skipped = state.skipped_nodes.len(),
            "Execution finished"
        );
        self.persist(state).await;
        self.events
            .emit(EngineEvent::execution_finished(&state.execution_id, status, duration_ms))
            .await;
    }

    async fn finish_cancelled(&self, state: &mut ExecutionState, token: &CancellationToken) {
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        state.cancel(&reason);
        state.current_node = None;

        info!(execution_id = %state.execution_id, reason = %reason, "Execution cancelled");
        self.persist(state).await;
        self.events
            .emit(EngineEvent::execution_cancelled(&state.execution_id, &reason))
            .await;
    }
}
