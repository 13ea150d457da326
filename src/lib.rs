//! qapilot library
//!
//! The run boundary, configuration loading and scenario replay on top of
//! the `agent-core` decision loop.

pub mod config;
pub mod replay;
pub mod runner;

pub use config::{load_config, Config, LoadedConfig, LoggingConfig};
pub use replay::{replay, ReplayError, ReplayOptions, ReplayReport, Scenario, ScenarioExpect};
pub use runner::{run, RunRequest, Runner};

pub use agent_core::{RunOutcome, RunReport, TerminationReason};
