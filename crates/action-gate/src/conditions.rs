//! Condition types for post-action validation

use std::fmt;

use serde::{Deserialize, Serialize};

/// One checkable expectation about the page after a step.
///
/// Unit conditions are written as plain strings (`"url_changes"`), the others
/// as single-key objects (`{"text_appears": "Welcome"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// URL differs from the one before the step
    UrlChanges,

    /// URL is the same as before the step
    UrlUnchanged,

    /// URL contains substring
    UrlContains(String),

    /// URL matches regex pattern
    UrlMatches(String),

    /// Some indexed element's label contains the text (case-insensitive)
    TextAppears(String),

    /// No indexed element's label contains the text
    TextAbsent(String),

    /// Title contains substring (case-insensitive)
    TitleContains(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::UrlChanges => f.write_str("URL changes"),
            Condition::UrlUnchanged => f.write_str("URL unchanged"),
            Condition::UrlContains(s) => write!(f, "URL contains '{s}'"),
            Condition::UrlMatches(p) => write!(f, "URL matches /{p}/"),
            Condition::TextAppears(s) => write!(f, "text '{s}' appears"),
            Condition::TextAbsent(s) => write!(f, "text '{s}' absent"),
            Condition::TitleContains(s) => write!(f, "title contains '{s}'"),
        }
    }
}
