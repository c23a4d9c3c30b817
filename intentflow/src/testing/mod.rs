//! Testing utilities for intentflow executions.
//!
//! This module provides:
//! - A scripted agent client with call and concurrency tracking
//! - Scripted quality gate, failing store and recording safety validator
//! - Graph fixtures

mod fixtures;
mod mocks;

pub use fixtures::{approval_graph, fan_out_graph, linear_graph, test_node, TEST_AGENT};
pub use mocks::{
    FailingStore, FailureMode, RecordingSafetyValidator, ScriptedAgent, ScriptedQualityGate,
};
