//! Identifier generation.

use uuid::Uuid;

/// Generates a new execution id.
///
/// UUID v7 ids sort by creation time, which keeps store listings chronological.
#[must_use]
pub fn generate_execution_id() -> String {
    format!("exec-{}", Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_prefixed() {
        let a = generate_execution_id();
        let b = generate_execution_id();
        assert_ne!(a, b);
        assert!(a.starts_with("exec-"));
    }
}
