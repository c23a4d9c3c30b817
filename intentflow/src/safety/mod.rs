//! Optional pre/post safety hooks.
//!
//! The rule engine itself is external. The engine only asks a
//! [`SafetyValidator`] to vet the request before any node runs and to
//! sanitize the output after a pass is finalized.

use crate::config::SafetyRequirements;
use crate::errors::{CollaboratorError, EngineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// Result of a pre-execution check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the request may proceed.
    pub passed: bool,
    /// Violations found.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SafetyVerdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    /// A failing verdict.
    #[must_use]
    pub fn fail(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            passed: false,
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }
}

/// External safety collaborator.
#[async_trait]
pub trait SafetyValidator: Send + Sync + Debug {
    /// Vets the execution request.
    async fn validate_input(
        &self,
        input: &Value,
        rules: &[String],
    ) -> Result<SafetyVerdict, CollaboratorError>;

    /// Returns a sanitized copy of the output.
    async fn sanitize_output(&self, output: &Value, rules: &[String])
        -> Result<Value, CollaboratorError>;
}

/// Applies a validator according to [`SafetyRequirements`].
#[derive(Debug, Clone)]
pub struct SafetyCheck<'a> {
    validator: Option<&'a Arc<dyn SafetyValidator>>,
    requirements: &'a SafetyRequirements,
}

impl<'a> SafetyCheck<'a> {
    /// Creates a check; it is inert unless both a validator is present and checks are enabled.
    #[must_use]
    pub fn new(
        validator: Option<&'a Arc<dyn SafetyValidator>>,
        requirements: &'a SafetyRequirements,
    ) -> Self {
        Self {
            validator,
            requirements,
        }
    }

    fn active(&self) -> Option<&'a Arc<dyn SafetyValidator>> {
        self.validator.filter(|_| self.requirements.enabled)
    }

    /// Runs the pre-execution check.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SafetyCheckFailed`] if the validator rejects the
    /// request or cannot be reached.
    pub async fn pre_check(&self, input: &Value) -> Result<(), EngineError> {
        let Some(validator) = self.active() else {
            return Ok(());
        };

        match validator.validate_input(input, &self.requirements.rules).await {
            Ok(verdict) if verdict.passed => Ok(()),
            Ok(verdict) => Err(EngineError::SafetyCheckFailed {
                errors: verdict.errors,
            }),
            Err(e) => Err(EngineError::SafetyCheckFailed {
                errors: vec![e.to_string()],
            }),
        }
    }

    /// Sanitizes the output; a validator failure keeps the original.
    pub async fn post_sanitize(&self, output: Value) -> Value {
        let Some(validator) = self.active() else {
            return output;
        };

        match validator.sanitize_output(&output, &self.requirements.rules).await {
            Ok(sanitized) => sanitized,
            Err(e) => {
                warn!(error = %e, "Output sanitization failed, returning unsanitized output");
                output
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Redactor;

    #[async_trait]
    impl SafetyValidator for Redactor {
        async fn validate_input(
            &self,
            input: &Value,
            _rules: &[String],
        ) -> Result<SafetyVerdict, CollaboratorError> {
            if input.to_string().contains("ssn") {
                Ok(SafetyVerdict::fail(["pii: ssn"]))
            } else {
                Ok(SafetyVerdict::pass())
            }
        }

        async fn sanitize_output(
            &self,
            _output: &Value,
            _rules: &[String],
        ) -> Result<Value, CollaboratorError> {
            Err(CollaboratorError::new("safety", "unavailable"))
        }
    }

    #[tokio::test]
    async fn test_pre_check_rejects() {
        let validator: Arc<dyn SafetyValidator> = Arc::new(Redactor);
        let reqs = SafetyRequirements::with_rules(["pii"]);
        let check = SafetyCheck::new(Some(&validator), &reqs);

        assert!(check.pre_check(&json!({"q": "hello"})).await.is_ok());
        let err = check.pre_check(&json!({"ssn": 1})).await.unwrap_err();
        assert!(matches!(err, EngineError::SafetyCheckFailed { ref errors } if errors == &["pii: ssn"]));
    }

    #[tokio::test]
    async fn test_disabled_is_inert() {
        let validator: Arc<dyn SafetyValidator> = Arc::new(Redactor);
        let reqs = SafetyRequirements::default();
        let check = SafetyCheck::new(Some(&validator), &reqs);

        assert!(check.pre_check(&json!({"ssn": 1})).await.is_ok());
    }

    #[tokio::test]
    async fn test_sanitize_failure_keeps_output() {
        let validator: Arc<dyn SafetyValidator> = Arc::new(Redactor);
        let reqs = SafetyRequirements::with_rules(["pii"]);
        let check = SafetyCheck::new(Some(&validator), &reqs);

        let output = json!({"a": 1});
        assert_eq!(check.post_sanitize(output.clone()).await, output);
    }
}
