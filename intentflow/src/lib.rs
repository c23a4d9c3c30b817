//! # Intentflow
//!
//! An execution engine for agent intent graphs.
//!
//! An intent graph is a DAG of agent/tool invocations produced by an upstream
//! planner. Intentflow runs it with support for:
//!
//! - **Graph validation**: cycles, dangling references and malformed approval
//!   nodes are rejected before anything runs
//! - **Bounded parallel scheduling**: ready nodes are dispatched concurrently up
//!   to `max_parallel`, with failure propagation and conditional branches
//! - **Retry and timeout**: transient agent failures are retried with backoff
//! - **Human approval**: executions pause at approval nodes, persist their
//!   state and resume later on the approved or rejected branch
//! - **Quality reruns**: a quality gate can request partial or full reruns,
//!   bounded by a rerun budget
//! - **Cancellation**: running or paused executions can be cancelled
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use intentflow::prelude::*;
//!
//! let engine = ExecutionEngine::builder(Arc::new(HttpAgentClient::new("http://agents:8080")?))
//!     .with_store(Arc::new(FileExecutionStateStore::open("/var/lib/intentflow").await?))
//!     .build()?;
//!
//! let result = engine.execute_graph(graph, None, context).await?;
//! if result.is_paused() {
//!     engine.resume(&result.execution_id, ApprovalDecision::Approved, None).await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod hitl;
pub mod observability;
pub mod quality;
pub mod safety;
pub mod scheduler;
pub mod state;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ExecutionConfig, QualityRequirements, SafetyRequirements};
    pub use crate::core::{ExecutionStatus, NodeError, NodeErrorKind, NodeResult};
    pub use crate::engine::{ExecutionEngine, ExecutionEngineBuilder, ExecutionResult};
    pub use crate::errors::{
        CollaboratorError, ConfigError, ContractErrorInfo, EngineError, GraphValidationError,
        StoreError,
    };
    pub use crate::events::{EngineEvent, EventSink, LoggingEventSink, NoOpEventSink};
    #[cfg(feature = "http")]
    pub use crate::executor::HttpAgentClient;
    pub use crate::executor::{
        AgentClient, AgentError, AgentRequest, AgentResponse, BackoffStrategy, FnAgentClient,
        RetrySettings,
    };
    pub use crate::graph::{
        ApprovalOptions, Edge, EdgeCondition, GraphValidator, IntentGraph, Node, RetryPolicy,
        ValidatedGraph,
    };
    pub use crate::hitl::{ApprovalDecision, HitlNotifier, LoggingHitlNotifier};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::quality::{
        QualityAssessment, QualityGate, RequiredFieldsQualityGate, RerunStrategy,
    };
    pub use crate::safety::{SafetyValidator, SafetyVerdict};
    pub use crate::state::{
        ExecutionState, ExecutionStateStore, FileExecutionStateStore,
        InMemoryExecutionStateStore,
    };
    pub use std::sync::Arc;
}
