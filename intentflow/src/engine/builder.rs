//! Engine builder.

use super::ExecutionEngine;
use crate::config::ExecutionConfig;
use crate::errors::EngineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::executor::AgentClient;
use crate::hitl::{HitlController, HitlNotifier, LoggingHitlNotifier};
use crate::quality::QualityGate;
use crate::safety::SafetyValidator;
use crate::state::{ExecutionStateStore, InMemoryExecutionStateStore};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Assembles an [`ExecutionEngine`] from its collaborators.
///
/// Only the agent client is required. The store defaults to an
/// [`InMemoryExecutionStateStore`], the notifier to [`LoggingHitlNotifier`] and
/// the event sink to [`NoOpEventSink`].
pub struct ExecutionEngineBuilder {
    agent: Arc<dyn AgentClient>,
    store: Option<Arc<dyn ExecutionStateStore>>,
    quality_gate: Option<Arc<dyn QualityGate>>,
    safety_validator: Option<Arc<dyn SafetyValidator>>,
    notifier: Option<Arc<dyn HitlNotifier>>,
    events: Option<Arc<dyn EventSink>>,
    config: ExecutionConfig,
}

impl ExecutionEngineBuilder {
    /// Creates a builder around an agent client.
    #[must_use]
    pub fn new(agent: Arc<dyn AgentClient>) -> Self {
        Self {
            agent,
            store: None,
            quality_gate: None,
            safety_validator: None,
            notifier: None,
            events: None,
            config: ExecutionConfig::default(),
        }
    }

    /// Sets the state store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the quality gate consulted when quality checks are enabled.
    #[must_use]
    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality_gate = Some(gate);
        self
    }

    /// Sets the safety validator consulted when safety checks are enabled.
    #[must_use]
    pub fn with_safety_validator(mut self, validator: Arc<dyn SafetyValidator>) -> Self {
        self.safety_validator = Some(validator);
        self
    }

    /// Sets the approval notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn HitlNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Sets the default configuration for executions started without one.
    #[must_use]
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the default configuration is invalid.
    pub fn build(self) -> Result<ExecutionEngine, EngineError> {
        self.config.validate()?;

        Ok(ExecutionEngine {
            agent: self.agent,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryExecutionStateStore::new())),
            quality_gate: self.quality_gate,
            safety_validator: self.safety_validator,
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(LoggingHitlNotifier)),
            events: self.events.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            config: self.config,
            hitl: HitlController::new(),
            active: DashMap::new(),
        })
    }
}

impl fmt::Debug for ExecutionEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngineBuilder")
            .field("agent", &self.agent)
            .field("has_store", &self.store.is_some())
            .field("quality_gate", &self.quality_gate)
            .field("safety_validator", &self.safety_validator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AgentResponse, FnAgentClient};
    use serde_json::json;

    fn agent() -> Arc<dyn AgentClient> {
        Arc::new(FnAgentClient::new("echo", |_req| async {
            Ok(AgentResponse::ok(json!({})))
        }))
    }

    #[test]
    fn test_build_with_defaults() {
        let engine = ExecutionEngineBuilder::new(agent()).build().unwrap();
        assert_eq!(engine.config().max_parallel, ExecutionConfig::default().max_parallel);
        assert!(engine.active_executions().is_empty());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = ExecutionEngineBuilder::new(agent())
            .with_config(ExecutionConfig::default().with_max_parallel(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
