//! Run outcome and report.

use action_gate::Verdict;
use chrono::{DateTime, Utc};
use qapilot_core_types::{Generation, RunId};
use serde::{Deserialize, Serialize};

use super::failure::{FailureCounters, ForcedReason};
use super::types::{StepClass, StepPhase, StepRecord};

/// Why the run reached REPORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The oracle terminated the run.
    Done,
    StepBudget,
    RepeatedAction,
    ConsecutiveFailures,
    IgnoredFinalWarning,
    SessionLost,
    Cancelled,
}

impl TerminationReason {
    /// The run reached a decided end, even if that end is a failure.
    pub fn is_completed(self) -> bool {
        !matches!(
            self,
            TerminationReason::SessionLost | TerminationReason::Cancelled
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            TerminationReason::Done => "terminated by the oracle",
            TerminationReason::StepBudget => "step budget exhausted",
            TerminationReason::RepeatedAction => "same action repeated without progress",
            TerminationReason::ConsecutiveFailures => "too many consecutive failed steps",
            TerminationReason::IgnoredFinalWarning => "terminate-only step was not honored",
            TerminationReason::SessionLost => "browser session lost",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

impl From<ForcedReason> for TerminationReason {
    fn from(reason: ForcedReason) -> Self {
        match reason {
            ForcedReason::Repetition => TerminationReason::RepeatedAction,
            ForcedReason::ConsecutiveFailures => TerminationReason::ConsecutiveFailures,
            ForcedReason::IgnoredFinalWarning => TerminationReason::IgnoredFinalWarning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: u32,
    pub phase: StepPhase,
    pub class: StepClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Elements that appeared while the step's actions ran.
    #[serde(default)]
    pub new_elements: usize,
    pub summary: String,
}

impl From<&StepRecord> for StepSummary {
    fn from(record: &StepRecord) -> Self {
        Self {
            step: record.step,
            phase: record.phase,
            class: record.class,
            verdict: record.verdict,
            new_elements: record.new_elements,
            summary: record.summary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    pub final_url: String,
    pub termination: TerminationReason,
    /// Oracle summary when it terminated, otherwise the termination reason.
    pub summary: String,
    pub steps: Vec<StepSummary>,
    pub failures: FailureCounters,
    pub generation: Generation,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Result of [`WorkflowScheduler::run`](super::WorkflowScheduler::run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub completed: bool,
    pub success: bool,
    pub step_count: u32,
    pub report: RunReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn termination(&self) -> TerminationReason {
        self.report.termination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lost_or_cancelled_runs_are_incomplete() {
        assert!(TerminationReason::Done.is_completed());
        assert!(TerminationReason::StepBudget.is_completed());
        assert!(TerminationReason::from(ForcedReason::Repetition).is_completed());
        assert!(!TerminationReason::SessionLost.is_completed());
        assert!(!TerminationReason::Cancelled.is_completed());
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::IgnoredFinalWarning).unwrap();
        assert_eq!(json, "\"ignored_final_warning\"");
    }
}
