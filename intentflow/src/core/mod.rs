//! Core domain types shared by every layer of the engine.
//!
//! - Execution status lifecycle
//! - Node results and node-level error kinds

mod node_result;
mod status;

pub use node_result::{NodeError, NodeErrorKind, NodeResult};
pub use status::ExecutionStatus;
