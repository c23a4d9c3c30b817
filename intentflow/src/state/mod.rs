//! Execution state and its persistence contract.
//!
//! The engine owns the live [`ExecutionState`]; stores hold serialized
//! snapshots used for resume and crash recovery.

mod execution;
mod file;
mod memory;
mod store;

pub use execution::ExecutionState;
pub use file::FileExecutionStateStore;
pub use memory::InMemoryExecutionStateStore;
#[cfg(test)]
pub use store::MockExecutionStateStore;
pub use store::ExecutionStateStore;
