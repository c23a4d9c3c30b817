//! Scripted collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::ExecutionStatus;
use crate::errors::{CollaboratorError, StoreError};
use crate::executor::{AgentClient, AgentError, AgentRequest, AgentResponse};
use crate::quality::{QualityAssessment, QualityGate, QualityRequest};
use crate::safety::{SafetyValidator, SafetyVerdict};
use crate::state::{ExecutionState, ExecutionStateStore, InMemoryExecutionStateStore};

type Reply = Result<AgentResponse, AgentError>;

struct Gauge<'a>(&'a AtomicUsize);

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An agent client that answers from per-node scripts.
///
/// Each node's replies are consumed in order and the last one repeats. A node
/// without a script succeeds with `{"node": id, "tool": tool, "input": input}`.
/// Calls are recorded and the peak number of concurrent calls is tracked.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: Mutex<Vec<AgentRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAgent {
    /// Creates an agent where every node succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, node_id: impl Into<String>, reply: Reply) -> Self {
        self.scripts
            .get_mut()
            .entry(node_id.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queues a successful result for a node.
    #[must_use]
    pub fn with_result(self, node_id: impl Into<String>, result: Value) -> Self {
        self.push(node_id, Ok(AgentResponse::ok(result)))
    }

    /// Queues a response for a node.
    #[must_use]
    pub fn with_response(self, node_id: impl Into<String>, response: AgentResponse) -> Self {
        self.push(node_id, Ok(response))
    }

    /// Queues a client error for a node.
    #[must_use]
    pub fn with_error(self, node_id: impl Into<String>, error: AgentError) -> Self {
        self.push(node_id, Err(error))
    }

    /// Delays every call of one node.
    #[must_use]
    pub fn with_delay(mut self, node_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(node_id.into(), delay);
        self
    }

    /// Delays every call of nodes without their own delay.
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Returns every request received, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().clone()
    }

    /// Returns the node ids called, in arrival order.
    #[must_use]
    pub fn called_nodes(&self) -> Vec<String> {
        self.calls.lock().iter().map(|r| r.node_id.clone()).collect()
    }

    /// Returns how often a node was called.
    #[must_use]
    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.node_id == node_id)
            .count()
    }

    /// Returns the highest number of calls that were in flight at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &AgentRequest) -> Reply {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&request.node_id) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(Self::echo(request))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(Self::echo(request))),
            None => Ok(Self::echo(request)),
        }
    }

    fn echo(request: &AgentRequest) -> AgentResponse {
        AgentResponse::ok(json!({
            "node": request.node_id,
            "tool": request.tool,
            "input": request.input,
        }))
    }
}

#[async_trait]
impl AgentClient for ScriptedAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _gauge = Gauge(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.calls.lock().push(request.clone());

        let delay = self
            .delays
            .get(&request.node_id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.next_reply(&request)
    }
}

/// A quality gate that returns scripted assessments.
///
/// Assessments are consumed in order and the last one repeats.
#[derive(Debug)]
pub struct ScriptedQualityGate {
    replies: Mutex<VecDeque<Result<QualityAssessment, CollaboratorError>>>,
    attempts: Mutex<Vec<u32>>,
}

impl ScriptedQualityGate {
    /// Creates a gate answering with `assessments` in order.
    #[must_use]
    pub fn new(assessments: impl IntoIterator<Item = QualityAssessment>) -> Self {
        Self {
            replies: Mutex::new(assessments.into_iter().map(Ok).collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Creates a gate that always gives the same assessment.
    #[must_use]
    pub fn always(assessment: QualityAssessment) -> Self {
        Self::new([assessment])
    }

    /// Creates a gate that always fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(CollaboratorError::new(
                "quality gate",
                message,
            ))])),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Returns how many times the gate was consulted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Returns the `attempt` value of each request received.
    #[must_use]
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl QualityGate for ScriptedQualityGate {
    async fn evaluate(
        &self,
        request: &QualityRequest<'_>,
    ) -> Result<QualityAssessment, CollaboratorError> {
        self.attempts.lock().push(request.attempt);

        let mut replies = self.replies.lock();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.unwrap_or_else(|| Err(CollaboratorError::new("quality gate", "no assessment scripted")))
    }
}

/// When a [`FailingStore`] rejects writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every `put` fails.
    AllPuts,
    /// Only snapshots of paused executions fail.
    PausedPuts,
    /// Only snapshots of running executions fail.
    RunningPuts,
}

/// An in-memory store that rejects some writes.
#[derive(Debug)]
pub struct FailingStore {
    inner: InMemoryExecutionStateStore,
    mode: FailureMode,
    rejected: AtomicUsize,
}

impl FailingStore {
    /// Creates a store failing according to `mode`.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            inner: InMemoryExecutionStateStore::new(),
            mode,
            rejected: AtomicUsize::new(0),
        }
    }

    /// Returns how many writes were rejected.
    #[must_use]
    pub fn rejected_puts(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn rejects(&self, state: &ExecutionState) -> bool {
        match self.mode {
            FailureMode::AllPuts => true,
            FailureMode::PausedPuts => state.status == ExecutionStatus::PausedForApproval,
            FailureMode::RunningPuts => state.status == ExecutionStatus::Running,
        }
    }
}

#[async_trait]
impl ExecutionStateStore for FailingStore {
    async fn put(&self, execution_id: &str, state: &ExecutionState) -> Result<(), StoreError> {
        if self.rejects(state) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        self.inner.put(execution_id, state).await
    }

    async fn get(&self, execution_id: &str) -> Result<ExecutionState, StoreError> {
        self.inner.get(execution_id).await
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StoreError> {
        self.inner.delete(execution_id).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list().await
    }
}

/// A safety validator that records what it sees.
///
/// Passes by default. Sanitization replaces the listed top-level output keys
/// with `"[REDACTED]"`.
#[derive(Debug, Default)]
pub struct RecordingSafetyValidator {
    rejections: Vec<String>,
    redacted_keys: Vec<String>,
    inputs: Mutex<Vec<Value>>,
    outputs: Mutex<Vec<Value>>,
}

impl RecordingSafetyValidator {
    /// Creates a validator that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator that rejects every input with `errors`.
    #[must_use]
    pub fn rejecting(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            rejections: errors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Redacts a top-level output key.
    #[must_use]
    pub fn with_redacted_key(mut self, key: impl Into<String>) -> Self {
        self.redacted_keys.push(key.into());
        self
    }

    /// Returns every pre-check input received.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }

    /// Returns every output submitted for sanitization.
    #[must_use]
    pub fn outputs(&self) -> Vec<Value> {
        self.outputs.lock().clone()
    }
}

#[async_trait]
impl SafetyValidator for RecordingSafetyValidator {
    async fn validate_input(
        &self,
        input: &Value,
        _rules: &[String],
    ) -> Result<SafetyVerdict, CollaboratorError> {
        self.inputs.lock().push(input.clone());
        if self.rejections.is_empty() {
            Ok(SafetyVerdict::pass())
        } else {
            Ok(SafetyVerdict::fail(self.rejections.clone()))
        }
    }

    async fn sanitize_output(
        &self,
        output: &Value,
        _rules: &[String],
    ) -> Result<Value, CollaboratorError> {
        self.outputs.lock().push(output.clone());

        let mut sanitized = output.clone();
        if let Some(map) = sanitized.as_object_mut() {
            for key in &self.redacted_keys {
                if let Some(value) = map.get_mut(key) {
                    *value = Value::String("[REDACTED]".to_string());
                }
            }
        }
        Ok(sanitized)
    }
}
