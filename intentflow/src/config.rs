//! Execution configuration.
//!
//! Settings come from [`Default`], a JSON document, or `INTENTFLOW_*`
//! environment variables. The config an execution starts with is stored in
//! its state, so a resumed execution keeps the same settings.

use crate::errors::ConfigError;
use crate::executor::RetrySettings;
use crate::quality::{QualityCriteria, RerunStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "INTENTFLOW_";

/// Configuration for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum node invocations in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-attempt timeout for nodes without their own `timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// Backoff settings and fallback retry policy.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Post-execution quality checks.
    #[serde(default)]
    pub quality_requirements: QualityRequirements,
    /// Pre/post safety hooks.
    #[serde(default)]
    pub safety_requirements: SafetyRequirements,
    /// How long cancellation waits for in-flight calls before aborting them.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_max_parallel() -> usize {
    4
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_timeout_ms: None,
            retry: RetrySettings::default(),
            quality_requirements: QualityRequirements::default(),
            safety_requirements: SafetyRequirements::default(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `INTENTFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::default();
        if let Some(v) = read("MAX_PARALLEL") {
            config.max_parallel = parse_env(v)?;
        }
        if let Some(v) = read("DEFAULT_TIMEOUT_MS") {
            config.default_timeout_ms = Some(parse_env(v)?);
        }
        if let Some(v) = read("RETRY_BASE_DELAY_MS") {
            config.retry.base_delay_ms = parse_env(v)?;
        }
        if let Some(v) = read("RETRY_MAX_DELAY_MS") {
            config.retry.max_delay_ms = parse_env(v)?;
        }
        if let Some(v) = read("QUALITY_ENABLED") {
            config.quality_requirements.enabled = parse_env(v)?;
        }
        if let Some(v) = read("ACCURACY_THRESHOLD") {
            config.quality_requirements.accuracy_threshold = parse_env(v)?;
        }
        if let Some(v) = read("MAX_RERUN_ATTEMPTS") {
            config.quality_requirements.max_rerun_attempts = parse_env(v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::OutOfRange(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        let threshold = self.quality_requirements.accuracy_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::OutOfRange(format!(
                "accuracy_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::OutOfRange(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the parallelism bound.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the default per-attempt timeout.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the quality requirements.
    #[must_use]
    pub fn with_quality(mut self, quality: QualityRequirements) -> Self {
        self.quality_requirements = quality;
        self
    }

    /// Sets the safety requirements.
    #[must_use]
    pub fn with_safety(mut self, safety: SafetyRequirements) -> Self {
        self.safety_requirements = safety;
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace_ms(mut self, grace_ms: u64) -> Self {
        self.cancel_grace_ms = grace_ms;
        self
    }

    /// Cancellation grace period as a duration.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn parse_env<T: FromStr>((key, value): (String, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Post-execution quality settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRequirements {
    /// Whether the quality gate runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum acceptable score.
    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f64,
    /// Reruns allowed after the first pass.
    #[serde(default = "default_max_rerun_attempts")]
    pub max_rerun_attempts: u32,
    /// Fields the gate expects in the output.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Rerun strategy; `adaptive` defers to the gate.
    #[serde(default)]
    pub rerun_strategy: RerunStrategy,
}

fn default_accuracy_threshold() -> f64 {
    0.8
}

fn default_max_rerun_attempts() -> u32 {
    2
}

impl Default for QualityRequirements {
    fn default() -> Self {
        Self {
            enabled: false,
            accuracy_threshold: default_accuracy_threshold(),
            max_rerun_attempts: default_max_rerun_attempts(),
            required_fields: Vec::new(),
            rerun_strategy: RerunStrategy::default(),
        }
    }
}

impl QualityRequirements {
    /// Default requirements with the gate switched on.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the accuracy threshold.
    #[must_use]
    pub fn with_accuracy_threshold(mut self, threshold: f64) -> Self {
        self.accuracy_threshold = threshold;
        self
    }

    /// Sets the rerun budget.
    #[must_use]
    pub fn with_max_rerun_attempts(mut self, attempts: u32) -> Self {
        self.max_rerun_attempts = attempts;
        self
    }

    /// Sets the required fields.
    #[must_use]
    pub fn with_required_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the rerun strategy.
    #[must_use]
    pub fn with_rerun_strategy(mut self, strategy: RerunStrategy) -> Self {
        self.rerun_strategy = strategy;
        self
    }

    /// Criteria handed to the quality gate.
    #[must_use]
    pub fn criteria(&self) -> QualityCriteria {
        QualityCriteria {
            required_fields: self.required_fields.clone(),
            accuracy_threshold: self.accuracy_threshold,
        }
    }
}

/// Safety hook settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRequirements {
    /// Whether the safety validator is consulted.
    #[serde(default)]
    pub enabled: bool,
    /// Opaque rule identifiers passed to the validator.
    #[serde(default)]
    pub rules: Vec<String>,
}

impl SafetyRequirements {
    /// Enables safety checks with the given rules.
    #[must_use]
    pub fn with_rules(rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: true,
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(!config.quality_requirements.enabled);
        assert!((config.quality_requirements.accuracy_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.quality_requirements.max_rerun_attempts, 2);
        assert_eq!(config.quality_requirements.rerun_strategy, RerunStrategy::Adaptive);
        assert_eq!(config.cancel_grace_ms, 5000);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ExecutionConfig::from_json_str(
            r#"{"max_parallel": 2, "quality_requirements": {"enabled": true, "max_rerun_attempts": 0}}"#,
        )
        .unwrap();

        assert_eq!(config.max_parallel, 2);
        assert!(config.quality_requirements.enabled);
        assert_eq!(config.quality_requirements.max_rerun_attempts, 0);
        assert!((config.quality_requirements.accuracy_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("INTENTFLOW_MAX_PARALLEL", "8"),
            ("INTENTFLOW_DEFAULT_TIMEOUT_MS", "2500"),
            ("INTENTFLOW_QUALITY_ENABLED", "true"),
            ("INTENTFLOW_ACCURACY_THRESHOLD", "0.9"),
        ]
        .into_iter()
        .collect();

        let config =
            ExecutionConfig::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();

        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.default_timeout_ms, Some(2500));
        assert!(config.quality_requirements.enabled);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = ExecutionConfig::from_lookup(|key| {
            (key == "INTENTFLOW_MAX_PARALLEL").then(|| "many".to_string())
        })
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "INTENTFLOW_MAX_PARALLEL"));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(ExecutionConfig::new().with_max_parallel(0).validate().is_err());
        assert!(ExecutionConfig::new()
            .with_quality(QualityRequirements::enabled().with_accuracy_threshold(1.5))
            .validate()
            .is_err());
        assert!(ExecutionConfig::new().validate().is_ok());
    }
}
