//! Small shared helpers.

mod ids;
mod json_path;

pub use ids::generate_execution_id;
pub use json_path::{is_truthy, lookup_path};
