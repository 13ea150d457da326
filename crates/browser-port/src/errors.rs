use qapilot_core_types::{NodeId, TabId};
use thiserror::Error;

/// Failures reported by a browser session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("session already released")]
    Released,

    #[error("{node} is no longer attached to the document")]
    NodeDetached { node: NodeId },

    #[error("{node} is not interactable: {reason}")]
    NotInteractable { node: NodeId, reason: String },

    #[error("option '{option}' is not offered by {node}")]
    OptionNotFound { node: NodeId, option: String },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("unknown tab {0}")]
    UnknownTab(TabId),

    #[error("command rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// The session can no longer be driven; nothing downstream should retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_loss_is_fatal() {
        assert!(SessionError::disconnected("crash").is_fatal());
        assert!(SessionError::Released.is_fatal());
        assert!(!SessionError::NodeDetached { node: NodeId(3) }.is_fatal());
        assert!(!SessionError::rejected("busy").is_fatal());
    }
}
