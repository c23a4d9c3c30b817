//! Intent graph model and validation.
//!
//! This module provides:
//! - The wire model submitted by the planner ([`IntentGraph`], [`Node`], [`Edge`])
//! - Edge conditions evaluated against producer results
//! - [`GraphValidator`], which turns a raw graph into a [`ValidatedGraph`]

mod condition;
mod model;
mod validator;

pub use condition::EdgeCondition;
pub use model::{
    ApprovalOptions, Edge, ExecutionPlan, IntentGraph, Node, RetryPolicy, APPROVAL_AGENT,
};
pub use validator::{ApprovalSpec, GraphValidator, Incoming, NodeKind, ValidatedGraph};
