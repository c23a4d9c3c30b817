//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Attempts are numbered from 1. After attempt `n` fails with a transient
//! error, the wait before attempt `n + 1` is:
//! - linear: `n * base`
//! - exponential: `base * 2^(n - 1)`
//! - constant: `base`
//!
//! capped at `max_delay_ms`, then jittered.

use crate::graph::RetryPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Engine-wide retry settings; per-node attempt counts come from [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
    /// Policy for nodes when neither node nor graph declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_policy: Option<RetryPolicy>,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: JitterStrategy::None,
            default_policy: None,
        }
    }
}

impl RetrySettings {
    /// Creates default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the fallback retry policy.
    #[must_use]
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    /// Picks the effective policy: node override, then graph default, then these settings.
    #[must_use]
    pub fn resolve_policy(
        &self,
        node_policy: Option<RetryPolicy>,
        graph_policy: Option<RetryPolicy>,
    ) -> RetryPolicy {
        node_policy
            .or(graph_policy)
            .or(self.default_policy)
            .unwrap_or_default()
    }

    /// Calculates the wait after `attempt` failed.
    #[must_use]
    pub fn delay_after(&self, backoff: BackoffStrategy, attempt: u32) -> Duration {
        let delay = backoff_delay_ms(backoff, self.base_delay_ms, attempt).min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Decides whether to make another attempt.
    #[must_use]
    pub fn decide(&self, policy: &RetryPolicy, attempt: u32, transient: bool) -> RetryDecision {
        if !transient {
            RetryDecision::NotRetryable
        } else if attempt >= policy.max_attempts.max(1) {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.delay_after(policy.backoff, attempt))
        }
    }
}

/// Raw backoff delay after `attempt` (1-based) failed, before capping and jitter.
#[must_use]
pub fn backoff_delay_ms(strategy: BackoffStrategy, base_ms: u64, attempt: u32) -> u64 {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Linear => base_ms.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            base_ms.saturating_mul(2u64.saturating_pow(attempt - 1))
        }
        BackoffStrategy::Constant => base_ms,
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}
