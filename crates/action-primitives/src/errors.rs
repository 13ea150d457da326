//! Error types for the action executor

use browser_port::SessionError;
use qapilot_core_types::{Generation, Handle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong while executing one action request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Request was computed against a different index generation
    #[error("stale handle: request targets {requested} but the current index is {current}")]
    StaleHandle {
        requested: Generation,
        current: Generation,
    },

    /// More than one element could satisfy a by-text request
    #[error("ambiguous target '{query}': {} elements match", .candidates.len())]
    AmbiguousTarget {
        query: String,
        candidates: Vec<Handle>,
    },

    /// Malformed or underspecified request
    #[error("invalid action: {0}")]
    Validation(String),

    /// Element exists but cannot be acted on right now
    #[error("element not interactable: {0}")]
    NotInteractable(String),

    /// Session rejected the command; the session itself is still usable
    #[error("browser command failed: {0}")]
    Session(String),

    /// Session disconnected or crashed
    #[error("browser session lost: {0}")]
    SessionFatal(String),

    /// Command acknowledgement did not arrive in time
    #[error("timed out: {0}")]
    Timeout(String),
}

/// How the decision loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rebuild the index and carry on; never counted as a failure.
    Stale,
    /// Reported back to the oracle and counted as a failure.
    Recoverable,
    /// Ends the run immediately.
    Fatal,
}

/// Serializable tag of an [`ActionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    StaleHandle,
    AmbiguousTarget,
    Validation,
    NotInteractable,
    Session,
    SessionFatal,
    Timeout,
}

impl ActionErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ActionErrorKind::StaleHandle => ErrorClass::Stale,
            ActionErrorKind::SessionFatal => ErrorClass::Fatal,
            ActionErrorKind::AmbiguousTarget
            | ActionErrorKind::Validation
            | ActionErrorKind::NotInteractable
            | ActionErrorKind::Session
            | ActionErrorKind::Timeout => ErrorClass::Recoverable,
        }
    }
}

impl ActionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ActionErrorKind {
        match self {
            ActionError::StaleHandle { .. } => ActionErrorKind::StaleHandle,
            ActionError::AmbiguousTarget { .. } => ActionErrorKind::AmbiguousTarget,
            ActionError::Validation(_) => ActionErrorKind::Validation,
            ActionError::NotInteractable(_) => ActionErrorKind::NotInteractable,
            ActionError::Session(_) => ActionErrorKind::Session,
            ActionError::SessionFatal(_) => ActionErrorKind::SessionFatal,
            ActionError::Timeout(_) => ActionErrorKind::Timeout,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl From<SessionError> for ActionError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        if err.is_fatal() {
            return ActionError::SessionFatal(message);
        }
        match err {
            SessionError::NodeDetached { .. } | SessionError::NotInteractable { .. } => {
                ActionError::NotInteractable(message)
            }
            SessionError::OptionNotFound { .. } | SessionError::UnknownTab(_) => {
                ActionError::Validation(message)
            }
            _ => ActionError::Session(message),
        }
    }
}
