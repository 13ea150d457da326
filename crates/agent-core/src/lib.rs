//! Agent core: the decision loop that drives a browser session.
//!
//! Provides the workflow scheduler, the failure tracker, the oracle seam and
//! the checklist collaborator. Sessions, element indexes, action execution
//! and verification come from the sibling crates.

pub mod agent_loop;
pub mod checklist;
pub mod errors;
pub mod oracle;

pub use agent_loop::{
    parse_decision, AgentDecision, AgentLoopConfig, Directive, FailureCounters, FailureTracker,
    ForcedReason, HistoryItem, PlannedAction, PlanningContext, RunOutcome, RunReport, StepClass,
    StepPhase, StepRecord, StepSummary, TerminationReason, TrackerMode, WorkflowScheduler,
    WorkflowState, WorkflowUpdate,
};
pub use checklist::{ChecklistStore, FileChecklist, MemoryChecklist};
pub use errors::AgentError;
pub use oracle::{FnOracle, HttpOracle, HttpOracleConfig, Oracle, ScriptedOracle};
