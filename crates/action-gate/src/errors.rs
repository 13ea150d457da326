//! Error types for expectation checks

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Invalid expectation spec
    #[error("Invalid ExpectSpec: {0}")]
    InvalidSpec(String),

    /// A condition needs a signal the reading does not carry
    #[error("Missing required signal: {0}")]
    MissingSignal(String),
}

impl GateError {
    pub fn invalid_pattern(pattern: &str, err: regex::Error) -> Self {
        GateError::InvalidSpec(format!("pattern '{pattern}' does not compile: {err}"))
    }
}
