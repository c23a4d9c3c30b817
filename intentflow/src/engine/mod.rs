//! The execution engine.
//!
//! [`ExecutionEngine`] validates a graph, schedules ready nodes onto the agent
//! client with bounded parallelism, suspends at approval nodes, runs the
//! quality-rerun loop and persists state along the way. One engine serves any
//! number of executions; writers to the same execution are serialized through
//! the [`HitlController`] lock.

mod builder;
mod result;
mod runner;

#[cfg(test)]
mod engine_tests;

pub use builder::ExecutionEngineBuilder;
pub use result::ExecutionResult;

use crate::cancellation::CancellationToken;
use crate::config::ExecutionConfig;
use crate::core::ExecutionStatus;
use crate::errors::{EngineError, StoreError};
use crate::events::{EngineEvent, EventSink};
use crate::executor::AgentClient;
use crate::graph::{GraphValidator, IntentGraph};
use crate::hitl::{ApprovalDecision, HitlController, HitlNotifier};
use crate::observability::SpanTimer;
use crate::quality::QualityGate;
use crate::safety::{SafetyCheck, SafetyValidator};
use crate::state::{ExecutionState, ExecutionStateStore};
use crate::utils::generate_execution_id;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Orchestrates intent graph executions.
pub struct ExecutionEngine {
    agent: Arc<dyn AgentClient>,
    store: Arc<dyn ExecutionStateStore>,
    quality_gate: Option<Arc<dyn QualityGate>>,
    safety_validator: Option<Arc<dyn SafetyValidator>>,
    notifier: Arc<dyn HitlNotifier>,
    events: Arc<dyn EventSink>,
    config: ExecutionConfig,
    hitl: HitlController,
    active: DashMap<String, Arc<CancellationToken>>,
}

impl ExecutionEngine {
    /// Starts building an engine around an agent client.
    #[must_use]
    pub fn builder(agent: Arc<dyn AgentClient>) -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new(agent)
    }

    /// Returns the default configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ExecutionStateStore> {
        &self.store
    }

    /// Executes a graph until it finishes, pauses for approval or is cancelled.
    ///
    /// `config` overrides the engine default for this execution and is stored
    /// with the state, so a later [`resume`](Self::resume) uses the same settings.
    ///
    /// # Errors
    ///
    /// Fails before any node runs if the configuration or graph is invalid or
    /// the safety pre-check rejects the request. Fails with
    /// [`EngineError::PersistenceRequiredForPauseFailed`] if the state cannot be
    /// stored when pausing. Node failures are reported in the result status.
    #[instrument(skip_all, fields(graph_id = %graph.graph_id))]
    pub async fn execute_graph(
        &self,
        graph: IntentGraph,
        config: Option<ExecutionConfig>,
        context: Map<String, Value>,
    ) -> Result<ExecutionResult, EngineError> {
        let timer = SpanTimer::start("execute_graph");
        let config = config.unwrap_or_else(|| self.config.clone());
        config.validate()?;

        let validated = GraphValidator::validate(&graph)?;
        SafetyCheck::new(self.safety_validator.as_ref(), &config.safety_requirements)
            .pre_check(&safety_input(&graph, &context))
            .await?;

        let execution_id = generate_execution_id();
        let guard = self.hitl.acquire(&execution_id).await;
        let mut state = ExecutionState::new(&execution_id, graph, config, context);

        info!(
            execution_id = %execution_id,
            node_count = validated.len(),
            "Starting execution"
        );
        self.events
            .emit(EngineEvent::execution_started(
                &execution_id,
                &state.graph.graph_id,
                validated.len(),
            ))
            .await;
        self.persist(&state).await;

        let outcome = self.run(&validated, &mut state).await;
        drop(guard);
        self.hitl.release(&execution_id);
        outcome?;

        Ok(self.build_result(&state, &timer).await)
    }

    /// Applies an approval decision to a paused execution and continues it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ExecutionNotFound`] for an unknown id and
    /// [`EngineError::InvalidState`] unless the execution is paused for
    /// approval. Concurrent calls are serialized; only the first one finds the
    /// execution paused.
    #[instrument(skip(self, decision, modified_context), fields(decision = %decision))]
    pub async fn resume(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
        modified_context: Option<Map<String, Value>>,
    ) -> Result<ExecutionResult, EngineError> {
        let timer = SpanTimer::start("resume");
        let guard = self.hitl.acquire(execution_id).await;

        let outcome = self
            .resume_locked(execution_id, decision, modified_context)
            .await;
        drop(guard);
        self.hitl.release(execution_id);
        let state = outcome?;

        Ok(self.build_result(&state, &timer).await)
    }

    async fn resume_locked(
        &self,
        execution_id: &str,
        decision: ApprovalDecision,
        modified_context: Option<Map<String, Value>>,
    ) -> Result<ExecutionState, EngineError> {
        let mut state = self.load(execution_id).await?;
        let validated = GraphValidator::validate(&state.graph)?;
        let node_id = HitlController::apply_decision(&mut state, decision, modified_context)?;

        self.events
            .emit(EngineEvent::execution_resumed(
                execution_id,
                &node_id,
                decision.is_approved(),
            ))
            .await;
        self.persist(&state).await;

        self.run(&validated, &mut state).await?;
        Ok(state)
    }

    /// Cancels a running or paused execution.
    ///
    /// A running execution stops dispatching, gets a grace period to drain
    /// in-flight calls and has the rest aborted. Cancelling an already
    /// cancelled execution returns its result again.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ExecutionNotFound`] for an unknown id,
    /// [`EngineError::InvalidState`] if it already finished otherwise, and
    /// [`EngineError::Store`] if the cancelled state cannot be persisted.
    #[instrument(skip(self, reason))]
    pub async fn cancel_execution(
        &self,
        execution_id: &str,
        reason: impl Into<String>,
    ) -> Result<ExecutionResult, EngineError> {
        let timer = SpanTimer::start("cancel_execution");
        let reason = reason.into();

        let token = self
            .active
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(token) = token {
            token.cancel(reason.clone());
        }

        let guard = self.hitl.acquire(execution_id).await;
        let outcome = self.cancel_locked(execution_id, &reason).await;
        drop(guard);
        self.hitl.release(execution_id);
        let state = outcome?;

        Ok(self.build_result(&state, &timer).await)
    }

    async fn cancel_locked(
        &self,
        execution_id: &str,
        reason: &str,
    ) -> Result<ExecutionState, EngineError> {
        let mut state = self.load(execution_id).await?;

        match state.status {
            ExecutionStatus::Cancelled => return Ok(state),
            status if status.is_terminal() => {
                return Err(EngineError::InvalidState {
                    execution_id: execution_id.to_string(),
                    status,
                    operation: "cancel",
                });
            }
            _ => {}
        }

        state.cancel(reason);
        state.current_node = None;
        self.store.put(execution_id, &state).await?;

        info!(execution_id = %execution_id, reason = %reason, "Execution cancelled");
        self.events
            .emit(EngineEvent::execution_cancelled(execution_id, reason))
            .await;
        Ok(state)
    }

    /// Loads the stored state of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ExecutionNotFound`] for an unknown id.
    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
        self.load(execution_id).await
    }

    /// Ids of executions currently being driven, sorted.
    #[must_use]
    pub fn active_executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn load(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
        match self.store.get(execution_id).await {
            Ok(state) => Ok(state),
            Err(StoreError::NotFound(_)) => {
                Err(EngineError::ExecutionNotFound(execution_id.to_string()))
            }
            Err(e) => Err(EngineError::Store(e)),
        }
    }

    /// Best-effort snapshot; failures are logged.
    async fn persist(&self, state: &ExecutionState) {
        if let Err(e) = self.store.put(&state.execution_id, state).await {
            warn!(
                execution_id = %state.execution_id,
                error = %e,
                "Failed to persist execution state"
            );
        }
    }

    async fn build_result(&self, state: &ExecutionState, timer: &SpanTimer) -> ExecutionResult {
        let mut output = state.output();
        if matches!(
            state.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::FailedQuality
        ) {
            output = SafetyCheck::new(
                self.safety_validator.as_ref(),
                &state.config.safety_requirements,
            )
            .post_sanitize(output)
            .await;
        }
        ExecutionResult::from_state(state, output, timer.elapsed_ms())
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("agent", &self.agent)
            .field("quality_gate", &self.quality_gate)
            .field("safety_validator", &self.safety_validator)
            .field("notifier", &self.notifier)
            .field("config", &self.config)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

fn safety_input(graph: &IntentGraph, context: &Map<String, Value>) -> Value {
    let nodes: Vec<Value> = graph
        .nodes
        .iter()
        .map(|node| json!({"id": node.id, "input": node.input}))
        .collect();
    json!({
        "graph_id": graph.graph_id,
        "context": context,
        "nodes": nodes,
    })
}
