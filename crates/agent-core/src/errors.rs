use action_primitives::ActionError;
use browser_port::SessionError;
use perceiver_structural::PerceiverError;
use thiserror::Error;

/// Errors emitted by the agent-core crate.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The oracle's output could not be read as a decision, even after repair.
    #[error("planner error: {0}")]
    Planner(String),

    /// The oracle could not be reached or answered with an error.
    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("{what} timed out after {ms} ms")]
    Timeout { what: &'static str, ms: u64 },

    #[error("checklist error: {0}")]
    Checklist(String),

    #[error("invalid agent configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Snapshot(#[from] PerceiverError),
}

impl AgentError {
    pub fn planner(message: impl Into<String>) -> Self {
        Self::Planner(message.into())
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle(message.into())
    }

    pub fn checklist(message: impl Into<String>) -> Self {
        Self::Checklist(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The session is gone; the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::Action(err) => err.is_fatal(),
            AgentError::Session(err) => err.is_fatal(),
            AgentError::Snapshot(err) => err.is_fatal(),
            _ => false,
        }
    }
}
