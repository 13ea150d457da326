use browser_port::SessionError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PerceiverError {
    /// The session could not produce a snapshot. No index was published.
    #[error("snapshot failed: {0}")]
    Snapshot(#[source] SessionError),
}

impl PerceiverError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Snapshot(err) => err.is_fatal(),
        }
    }
}

impl From<SessionError> for PerceiverError {
    fn from(err: SessionError) -> Self {
        Self::Snapshot(err)
    }
}
