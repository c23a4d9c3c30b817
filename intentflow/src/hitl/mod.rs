//! Human-in-the-loop approval.
//!
//! State machine:
//!
//! ```text
//! running -> paused_for_approval -> running (approved | rejected branch)
//!                                \-> cancelled
//! ```
//!
//! Pausing persists the state before control returns to the caller; a
//! decision arrives later through the engine's `resume`.

mod controller;
mod notifier;

pub use controller::{ApprovalDecision, ExecutionGuard, HitlController};
pub use notifier::{ApprovalNotice, ChannelHitlNotifier, HitlNotifier, LoggingHitlNotifier};
