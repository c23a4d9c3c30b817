//! Edge conditions.

use crate::utils::{is_truthy, lookup_path};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A predicate on the producing node's outcome.
///
/// Value conditions are evaluated against the producer's result and are only
/// satisfiable when the producer succeeded. [`EdgeCondition::OnFailure`] is the
/// inverse: it marks an alternate path taken only when the producer failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// `result.field == value`.
    Equals {
        /// Dotted path into the result.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// `result.field != value` (a missing field counts as not equal).
    NotEquals {
        /// Dotted path into the result.
        field: String,
        /// Rejected value.
        value: Value,
    },
    /// `result.field` is present and not null.
    Exists {
        /// Dotted path into the result.
        field: String,
    },
    /// `result.field` is truthy.
    Truthy {
        /// Dotted path into the result.
        field: String,
    },
    /// `result.field` is a string matching the regex.
    Matches {
        /// Dotted path into the result.
        field: String,
        /// Regular expression.
        pattern: String,
    },
    /// The producer failed.
    OnFailure,
}

impl EdgeCondition {
    /// Condition compiled for `next_on_approve` branches.
    #[must_use]
    pub fn approved() -> Self {
        Self::Equals {
            field: "approved".to_string(),
            value: Value::Bool(true),
        }
    }

    /// Condition compiled for `next_on_reject` branches.
    #[must_use]
    pub fn rejected() -> Self {
        Self::Equals {
            field: "approved".to_string(),
            value: Value::Bool(false),
        }
    }

    /// Returns true if the edge is only taken when the producer fails.
    #[must_use]
    pub fn is_failure_path(&self) -> bool {
        matches!(self, Self::OnFailure)
    }

    /// The regex of a [`EdgeCondition::Matches`] condition.
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        match self {
            Self::Matches { pattern, .. } => Some(pattern),
            _ => None,
        }
    }

    /// Evaluates the condition against a successful producer's result.
    ///
    /// A `matches` pattern is compiled on each call; an invalid one never
    /// matches. Validated graphs use [`evaluate_with`](Self::evaluate_with)
    /// and their precompiled patterns instead.
    #[must_use]
    pub fn evaluate(&self, result: Option<&Value>) -> bool {
        self.evaluate_with(result, None)
    }

    /// Evaluates the condition, using `compiled` for a `matches` pattern.
    #[must_use]
    pub fn evaluate_with(&self, result: Option<&Value>, compiled: Option<&Regex>) -> bool {
        let root = result.unwrap_or(&Value::Null);
        match self {
            Self::Equals { field, value } => lookup_path(root, field) == Some(value),
            Self::NotEquals { field, value } => lookup_path(root, field) != Some(value),
            Self::Exists { field } => lookup_path(root, field).is_some_and(|v| !v.is_null()),
            Self::Truthy { field } => lookup_path(root, field).is_some_and(is_truthy),
            Self::Matches { field, pattern } => {
                let Some(text) = lookup_path(root, field).and_then(Value::as_str) else {
                    return false;
                };
                if let Some(re) = compiled {
                    return re.is_match(text);
                }
                match Regex::new(pattern) {
                    Ok(re) => re.is_match(text),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Invalid edge condition pattern");
                        false
                    }
                }
            }
            Self::OnFailure => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_approval_conditions() {
        let approved = json!({"approved": true});
        let rejected = json!({"approved": false});

        assert!(EdgeCondition::approved().evaluate(Some(&approved)));
        assert!(!EdgeCondition::approved().evaluate(Some(&rejected)));
        assert!(EdgeCondition::rejected().evaluate(Some(&rejected)));
    }

    #[test]
    fn test_value_conditions() {
        let result = json!({"score": 0.9, "label": "spam-42", "tags": []});

        assert!(EdgeCondition::Exists { field: "label".into() }.evaluate(Some(&result)));
        assert!(!EdgeCondition::Exists { field: "nope".into() }.evaluate(Some(&result)));
        assert!(!EdgeCondition::Truthy { field: "tags".into() }.evaluate(Some(&result)));
        assert!(EdgeCondition::NotEquals {
            field: "label".into(),
            value: json!("ham")
        }
        .evaluate(Some(&result)));
        assert!(EdgeCondition::Matches {
            field: "label".into(),
            pattern: r"^spam-\d+$".into()
        }
        .evaluate(Some(&result)));
    }

    #[test]
    fn test_invalid_pattern_is_false() {
        let cond = EdgeCondition::Matches {
            field: "x".into(),
            pattern: "(".into(),
        };
        assert!(!cond.evaluate(Some(&json!({"x": "("}))));
    }

    #[test]
    fn test_precompiled_pattern_is_used() {
        let cond = EdgeCondition::Matches {
            field: "x".into(),
            pattern: "(".into(),
        };
        let compiled = Regex::new(r"^\($").unwrap();
        assert_eq!(cond.pattern(), Some("("));
        assert!(cond.evaluate_with(Some(&json!({"x": "("})), Some(&compiled)));
        assert_eq!(EdgeCondition::OnFailure.pattern(), None);
    }

    #[test]
    fn test_on_failure_never_satisfied_by_success() {
        assert!(EdgeCondition::OnFailure.is_failure_path());
        assert!(!EdgeCondition::OnFailure.evaluate(Some(&json!({}))));
    }

    #[test]
    fn test_condition_serde_tagging() {
        let cond: EdgeCondition =
            serde_json::from_str(r#"{"type": "equals", "field": "ok", "value": true}"#).unwrap();
        assert_eq!(
            cond,
            EdgeCondition::Equals {
                field: "ok".into(),
                value: json!(true)
            }
        );

        let failure: EdgeCondition = serde_json::from_str(r#"{"type": "on_failure"}"#).unwrap();
        assert!(failure.is_failure_path());
    }
}
