//! Decision loop (Think-Act-Verify) execution mode.
//!
//! The oracle is consulted once per step to decide the next actions from
//! the current element index, rather than producing a complete plan upfront.
//!
//! # Architecture
//!
//! ```text
//! INIT:   open start URL, build index g1
//! loop:
//!     THINK:  decision = oracle.decide(context)      // parse + one repair
//!     ACT:    execute 1-3 actions, settle, rebuild   // stale handles skipped
//!     VERIFY: judge results and expectations, feed the failure tracker
//! REPORT: release the session, assemble the outcome
//! ```
//!
//! # Key Components
//!
//! - [`AgentLoopConfig`]: Configuration for the loop
//! - [`WorkflowScheduler`]: Phase state machine
//! - [`FailureTracker`]: Consecutive-failure and repetition budgets
//! - [`WorkflowState`]: Merge-policy state held in the state store
//! - [`RunOutcome`]: Final result of a run

pub mod config;
pub mod decision;
pub mod failure;
pub mod prompt;
pub mod report;
pub mod scheduler;
pub mod state;
pub mod types;

pub use config::AgentLoopConfig;
pub use decision::parse_decision;
pub use failure::{FailureCounters, FailureTracker, ForcedReason, TrackerMode};
pub use prompt::{format_system_prompt, format_user_message};
pub use report::{RunOutcome, RunReport, StepSummary, TerminationReason};
pub use scheduler::WorkflowScheduler;
pub use state::{WorkflowState, WorkflowUpdate};
pub use types::{
    AgentDecision, Directive, HistoryItem, PlannedAction, PlanningContext, StepClass, StepPhase,
    StepRecord,
};
