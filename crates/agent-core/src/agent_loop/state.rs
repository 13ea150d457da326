//! Workflow state held in the state store.

use qapilot_core_types::Generation;
use qapilot_state_center::{define_state, Append, Replace};
use serde::{Deserialize, Serialize};

use super::failure::FailureCounters;
use super::types::StepRecord;

define_state! {
    /// Aggregate state of one run. History only ever grows; everything else
    /// is replaced by the latest update that names it.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct WorkflowState / WorkflowUpdate {
        pub generation: Replace<Generation>,
        pub history: Append<StepRecord>,
        pub failures: Replace<FailureCounters>,
        pub step_count: Replace<u32>,
        pub url: Replace<String>,
        pub completed: Replace<bool>,
        pub success: Replace<bool>,
        pub error: Replace<Option<String>>,
    }
}

impl WorkflowUpdate {
    /// Closes a step: one history entry plus the counters it left behind.
    pub fn step(record: StepRecord, failures: FailureCounters) -> Self {
        Self {
            generation: Some(record.generation),
            url: Some(record.url.clone()),
            history: vec![record],
            failures: Some(failures),
            ..Default::default()
        }
    }
}
