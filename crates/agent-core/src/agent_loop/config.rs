//! Configuration for the decision loop.

use std::time::Duration;

use action_primitives::{ExecutorConfig, StabilityGate};
use perceiver_structural::{IndexConfig, IndexRenderer};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

/// Knobs for one run of the decision loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Planning steps before the run is reported as out of budget.
    /// Default: 50
    pub max_steps: u32,

    /// Consecutive failed steps before the terminate-only warning.
    /// Default: 3
    pub max_failures: u32,

    /// Identical consecutive steps that force termination.
    /// Default: 3
    pub max_repetitions: u32,

    /// Grant the oracle one terminate-only step before forcing termination.
    /// Default: true
    pub final_response_after_failure: bool,

    /// Actions executed from a single decision; the rest are dropped.
    /// Default: 3
    pub max_actions_per_step: u32,

    /// Timeout for one oracle call in milliseconds.
    /// Default: 60000
    pub oracle_timeout_ms: u64,

    /// Timeout for one session command in milliseconds.
    /// Default: 15000
    pub command_timeout_ms: u64,

    /// Upper bound on a stability wait in milliseconds.
    /// Default: 10000
    pub stability_timeout_ms: u64,

    /// Trailing window without DOM mutations in milliseconds.
    /// Default: 500
    pub stability_quiet_window_ms: u64,

    /// Delay between activity probes in milliseconds.
    /// Default: 100
    pub stability_poll_interval_ms: u64,

    /// In-flight requests still counted as network idle.
    /// Default: 0
    pub network_idle_threshold: u32,

    /// Pause between actions of the same step in milliseconds.
    /// Default: 100
    pub wait_between_actions_ms: u64,

    /// Longest explicit wait the oracle may request in milliseconds.
    /// Default: 10000
    pub max_wait_ms: u64,

    /// Maximum number of elements to index.
    /// Default: 500
    pub max_elements: usize,

    /// Maximum depth of the tree to traverse.
    /// Default: 50
    pub max_depth: usize,

    /// Maximum text length per element.
    /// Default: 100
    pub max_text_length: usize,

    /// Whether to include element attributes in the rendered index.
    /// Default: true
    pub include_attributes: bool,

    /// Whether to capture a screenshot for the oracle.
    /// Default: true
    pub enable_vision: bool,

    /// Previous steps included in the planning context.
    /// Default: 10
    pub max_history_items: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_failures: 3,
            max_repetitions: 3,
            final_response_after_failure: true,
            max_actions_per_step: 3,
            oracle_timeout_ms: 60_000,
            command_timeout_ms: 15_000,
            stability_timeout_ms: 10_000,
            stability_quiet_window_ms: 500,
            stability_poll_interval_ms: 100,
            network_idle_threshold: 0,
            wait_between_actions_ms: 100,
            max_wait_ms: 10_000,
            max_elements: 500,
            max_depth: 50,
            max_text_length: 100,
            include_attributes: true,
            enable_vision: true,
            max_history_items: 10,
        }
    }
}

impl AgentLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts and waits, for in-memory sessions and tests.
    pub fn fast() -> Self {
        Self {
            oracle_timeout_ms: 5_000,
            command_timeout_ms: 2_000,
            stability_timeout_ms: 200,
            stability_quiet_window_ms: 5,
            stability_poll_interval_ms: 1,
            wait_between_actions_ms: 0,
            max_wait_ms: 1_000,
            enable_vision: false,
            ..Self::default()
        }
    }

    /// Builder: set max steps.
    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder: set max consecutive failures.
    pub fn max_failures(mut self, failures: u32) -> Self {
        self.max_failures = failures;
        self
    }

    pub fn max_repetitions(mut self, repetitions: u32) -> Self {
        self.max_repetitions = repetitions;
        self
    }

    /// Builder: skip the terminate-only step after repeated failures.
    pub fn final_response(mut self, enabled: bool) -> Self {
        self.final_response_after_failure = enabled;
        self
    }

    /// Builder: set max actions per step.
    pub fn actions_per_step(mut self, count: u32) -> Self {
        self.max_actions_per_step = count;
        self
    }

    /// Builder: set vision mode.
    pub fn vision(mut self, enabled: bool) -> Self {
        self.enable_vision = enabled;
        self
    }

    /// Builder: set oracle timeout.
    pub fn oracle_timeout(mut self, ms: u64) -> Self {
        self.oracle_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_steps == 0 {
            return Err(AgentError::config("max_steps must be at least 1"));
        }
        if self.max_failures == 0 {
            return Err(AgentError::config("max_failures must be at least 1"));
        }
        if self.max_repetitions < 2 {
            return Err(AgentError::config("max_repetitions must be at least 2"));
        }
        if self.max_actions_per_step == 0 {
            return Err(AgentError::config("max_actions_per_step must be at least 1"));
        }
        for (name, value) in [
            ("oracle_timeout_ms", self.oracle_timeout_ms),
            ("command_timeout_ms", self.command_timeout_ms),
            ("stability_timeout_ms", self.stability_timeout_ms),
            ("stability_poll_interval_ms", self.stability_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(AgentError::config(format!("{name} must be positive")));
            }
        }
        if self.max_elements == 0 {
            return Err(AgentError::config("max_elements must be at least 1"));
        }
        Ok(())
    }

    pub fn oracle_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_timeout_ms)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            command_timeout_ms: self.command_timeout_ms,
            max_wait_ms: self.max_wait_ms,
        }
    }

    pub fn stability_gate(&self) -> StabilityGate {
        StabilityGate::new(
            self.network_idle_threshold,
            self.stability_quiet_window_ms,
            self.stability_poll_interval_ms,
        )
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::new(self.max_elements)
            .with_max_depth(self.max_depth)
            .with_max_text_length(self.max_text_length)
    }

    pub fn renderer(&self) -> IndexRenderer {
        IndexRenderer::default()
            .with_attributes(self.include_attributes)
            .with_max_text_length(self.max_text_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentLoopConfig::default();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.max_repetitions, 3);
        assert!(config.final_response_after_failure);
        assert_eq!(config.max_actions_per_step, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = AgentLoopConfig::new()
            .max_steps(12)
            .max_failures(2)
            .vision(false)
            .actions_per_step(1);

        assert_eq!(config.max_steps, 12);
        assert_eq!(config.max_failures, 2);
        assert!(!config.enable_vision);
        assert_eq!(config.max_actions_per_step, 1);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        assert!(AgentLoopConfig::new().max_steps(0).validate().is_err());
        assert!(AgentLoopConfig::new().max_failures(0).validate().is_err());
        assert!(AgentLoopConfig::new().max_repetitions(1).validate().is_err());
        let mut config = AgentLoopConfig::fast();
        config.stability_poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: AgentLoopConfig = serde_json::from_str(r#"{"max_steps": 7}"#).unwrap();
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.max_failures, 3);
    }
}
