//! Failure tracker.
//!
//! Two budgets share one state machine over `Normal -> Warning ->
//! ForcedTermination`:
//!
//! - `repetition` is the length of the current run of structurally identical
//!   steps. Reaching `max_repetitions` forces termination at once, skipping
//!   the warning step, and is checked before the failure budget.
//! - `consecutive` counts failed steps since the last step with a successful
//!   action. Reaching `max_failures` enters `Warning`: the next planning
//!   context only accepts a terminate action. Any further observation while
//!   in `Warning` forces termination.

use action_primitives::ActionFingerprint;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::AgentLoopConfig;
use super::types::StepClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerMode {
    Normal,
    /// Next decision is restricted to terminate.
    Warning,
    ForcedTermination(ForcedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedReason {
    Repetition,
    ConsecutiveFailures,
    /// The terminate-only step was answered with something else.
    IgnoredFinalWarning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounters {
    pub consecutive: u32,
    pub repetition: u32,
    pub max_failures: u32,
    pub max_repetitions: u32,
    pub mode: TrackerMode,
}

impl Default for FailureCounters {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

impl FailureCounters {
    pub fn new(max_failures: u32, max_repetitions: u32) -> Self {
        Self {
            consecutive: 0,
            repetition: 0,
            max_failures,
            max_repetitions,
            mode: TrackerMode::Normal,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.mode == TrackerMode::Warning
    }

    pub fn forced(&self) -> Option<ForcedReason> {
        match self.mode {
            TrackerMode::ForcedTermination(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Pure transition function over [`FailureCounters`].
#[derive(Debug, Clone)]
pub struct FailureTracker {
    counters: FailureCounters,
    last_fingerprint: Option<Vec<ActionFingerprint>>,
    final_response: bool,
}

impl FailureTracker {
    pub fn new(config: &AgentLoopConfig) -> Self {
        Self {
            counters: FailureCounters::new(config.max_failures, config.max_repetitions),
            last_fingerprint: None,
            final_response: config.final_response_after_failure,
        }
    }

    pub fn counters(&self) -> &FailureCounters {
        &self.counters
    }

    pub fn mode(&self) -> TrackerMode {
        self.counters.mode
    }

    /// Records one closed step and returns the new mode.
    ///
    /// `fingerprint` is `None` when the step produced no decision; that
    /// breaks any run of identical steps.
    pub fn observe(
        &mut self,
        class: StepClass,
        fingerprint: Option<Vec<ActionFingerprint>>,
    ) -> TrackerMode {
        if let TrackerMode::ForcedTermination(_) = self.counters.mode {
            return self.counters.mode;
        }
        let was_warning = self.counters.is_warning();

        self.counters.repetition = match (&fingerprint, &self.last_fingerprint) {
            (Some(current), Some(previous)) if !current.is_empty() && current == previous => {
                self.counters.repetition + 1
            }
            (Some(current), _) if !current.is_empty() => 1,
            _ => 0,
        };
        self.last_fingerprint = fingerprint.filter(|fp| !fp.is_empty());

        match class {
            StepClass::Success => self.counters.consecutive = 0,
            StepClass::Failure => self.counters.consecutive += 1,
            StepClass::Neutral => {}
        }

        let counters = &self.counters;
        let next = if counters.repetition >= counters.max_repetitions {
            TrackerMode::ForcedTermination(ForcedReason::Repetition)
        } else if was_warning {
            TrackerMode::ForcedTermination(ForcedReason::IgnoredFinalWarning)
        } else if counters.consecutive > counters.max_failures {
            TrackerMode::ForcedTermination(ForcedReason::ConsecutiveFailures)
        } else if counters.consecutive == counters.max_failures {
            if self.final_response {
                TrackerMode::Warning
            } else {
                TrackerMode::ForcedTermination(ForcedReason::ConsecutiveFailures)
            }
        } else {
            TrackerMode::Normal
        };

        match next {
            TrackerMode::Normal => debug!(
                consecutive = counters.consecutive,
                repetition = counters.repetition,
                "Failure counters updated"
            ),
            TrackerMode::Warning => warn!(
                consecutive = counters.consecutive,
                "Failure budget reached; next step is terminate-only"
            ),
            TrackerMode::ForcedTermination(reason) => warn!(
                ?reason,
                consecutive = counters.consecutive,
                repetition = counters.repetition,
                "Forcing termination"
            ),
        }
        self.counters.mode = next;
        next
    }
}
