//! Request and result types for the action executor

use std::fmt;

use browser_port::TabTarget;
use chrono::{DateTime, Utc};
use qapilot_core_types::{Generation, Handle, TabId};
use serde::{Deserialize, Serialize};

use crate::errors::{ActionError, ActionErrorKind, ErrorClass};

fn default_true() -> bool {
    true
}

/// Target of a selection action: a handle, or text naming the widget.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectTarget {
    Handle(Handle),
    Label(String),
}

impl fmt::Display for SelectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectTarget::Handle(handle) => write!(f, "{handle}"),
            SelectTarget::Label(label) => write!(f, "'{label}'"),
        }
    }
}

/// Closed set of operations the oracle may request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate {
        url: String,
    },
    Click {
        handle: Handle,
    },
    Input {
        handle: Handle,
        text: String,
        #[serde(default = "default_true")]
        clear: bool,
    },
    /// Read-only first half of the two-step selection contract.
    ListOptions {
        target: SelectTarget,
    },
    /// Must name one of the strings returned by a prior `list_options`.
    ChooseOption {
        target: SelectTarget,
        text: String,
    },
    Scroll {
        amount: i32,
    },
    Extract {
        #[serde(default)]
        query: String,
    },
    Wait {
        duration_ms: u64,
    },
    SwitchTab {
        tab: TabTarget,
    },
    Terminate {
        success: bool,
        #[serde(default)]
        summary: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Click { .. } => "click",
            ActionKind::Input { .. } => "input",
            ActionKind::ListOptions { .. } => "list_options",
            ActionKind::ChooseOption { .. } => "choose_option",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Extract { .. } => "extract",
            ActionKind::Wait { .. } => "wait",
            ActionKind::SwitchTab { .. } => "switch_tab",
            ActionKind::Terminate { .. } => "terminate",
        }
    }

    pub fn handles(&self) -> Vec<Handle> {
        match self {
            ActionKind::Click { handle } | ActionKind::Input { handle, .. } => vec![*handle],
            ActionKind::ListOptions { target } | ActionKind::ChooseOption { target, .. } => {
                match target {
                    SelectTarget::Handle(handle) => vec![*handle],
                    SelectTarget::Label(_) => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// Resolves against the element index, so only valid for one generation.
    pub fn references_index(&self) -> bool {
        matches!(
            self,
            ActionKind::Click { .. }
                | ActionKind::Input { .. }
                | ActionKind::ListOptions { .. }
                | ActionKind::ChooseOption { .. }
        )
    }

    /// May change the page, so the index must be rebuilt afterwards.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionKind::Navigate { .. }
                | ActionKind::Click { .. }
                | ActionKind::Input { .. }
                | ActionKind::ChooseOption { .. }
                | ActionKind::Scroll { .. }
                | ActionKind::SwitchTab { .. }
        )
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, ActionKind::Terminate { .. })
    }

    /// Structural identity used for repetition detection: the tag and the
    /// handles, plus the target parameter for actions that carry no handle.
    pub fn fingerprint(&self) -> ActionFingerprint {
        let detail = match self {
            ActionKind::Navigate { url } => Some(url.clone()),
            ActionKind::ListOptions {
                target: SelectTarget::Label(label),
            }
            | ActionKind::ChooseOption {
                target: SelectTarget::Label(label),
                ..
            } => Some(label.to_lowercase()),
            ActionKind::Scroll { amount } => Some(amount.to_string()),
            ActionKind::Extract { query } => Some(query.clone()),
            ActionKind::Wait { duration_ms } => Some(duration_ms.to_string()),
            ActionKind::SwitchTab { tab } => Some(tab.to_string()),
            _ => None,
        };
        ActionFingerprint {
            tag: self.name().to_string(),
            handles: self.handles(),
            detail,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Navigate { url } => write!(f, "navigate {url}"),
            ActionKind::Click { handle } => write!(f, "click {handle}"),
            ActionKind::Input { handle, text, .. } => write!(f, "input {handle} {text:?}"),
            ActionKind::ListOptions { target } => write!(f, "list_options {target}"),
            ActionKind::ChooseOption { target, text } => {
                write!(f, "choose_option {target} {text:?}")
            }
            ActionKind::Scroll { amount } => write!(f, "scroll {amount}"),
            ActionKind::Extract { query } => write!(f, "extract {query:?}"),
            ActionKind::Wait { duration_ms } => write!(f, "wait {duration_ms}ms"),
            ActionKind::SwitchTab { tab } => write!(f, "switch_tab {tab}"),
            ActionKind::Terminate { success, .. } => write!(f, "terminate success={success}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionFingerprint {
    pub tag: String,
    pub handles: Vec<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// An action paired with the index generation it was computed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub generation: Generation,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ActionRequest {
    pub fn new(generation: Generation, kind: ActionKind) -> Self {
        Self { generation, kind }
    }

    /// Same action stamped with another generation.
    pub fn rebased(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Structured outcome of one executed request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Human-readable form of the request, e.g. `click [7]`.
    pub action: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ActionErrorKind>,
    /// The oracle asked to end the task.
    pub is_terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_success: Option<bool>,
    /// A mutating primitive reached the session successfully.
    pub mutated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_tab: Option<TabId>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ActionResult {
    pub fn success(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: ActionStatus::Success,
            extracted_content: None,
            error: None,
            error_kind: None,
            is_terminal: false,
            terminal_success: None,
            mutated: false,
            opened_tab: None,
            started_at: Utc::now(),
            latency_ms: 0,
        }
    }

    pub fn failure(action: impl Into<String>, err: &ActionError) -> Self {
        Self {
            status: ActionStatus::Error,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::success(action)
        }
    }

    pub fn terminal(action: impl Into<String>, success: bool, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            is_terminal: true,
            terminal_success: Some(success),
            extracted_content: (!summary.is_empty()).then_some(summary),
            ..Self::success(action)
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.extracted_content = Some(content.into());
        self
    }

    pub fn with_mutation(mut self, mutated: bool) -> Self {
        self.mutated = mutated;
        self
    }

    pub fn with_opened_tab(mut self, tab: Option<TabId>) -> Self {
        self.opened_tab = tab;
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, latency_ms: u64) -> Self {
        self.started_at = started_at;
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == ActionStatus::Error
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error_kind.map(ActionErrorKind::class)
    }

    pub fn is_stale(&self) -> bool {
        self.error_class() == Some(ErrorClass::Stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requests_parse_from_tagged_json() {
        let request: ActionRequest = serde_json::from_value(json!({
            "generation": 3,
            "action": "choose_option",
            "target": 12,
            "text": "Men"
        }))
        .unwrap();
        assert_eq!(request.generation, Generation(3));
        assert_eq!(
            request.kind,
            ActionKind::ChooseOption {
                target: SelectTarget::Handle(Handle(12)),
                text: "Men".into()
            }
        );
    }

    #[test]
    fn test_select_targets_accept_labels() {
        let kind: ActionKind = serde_json::from_value(json!({
            "action": "list_options",
            "target": "Country"
        }))
        .unwrap();
        assert_eq!(
            kind,
            ActionKind::ListOptions {
                target: SelectTarget::Label("Country".into())
            }
        );
        assert!(kind.handles().is_empty());
    }

    #[test]
    fn test_unknown_actions_are_rejected() {
        let parsed = serde_json::from_value::<ActionKind>(json!({"action": "hover", "handle": 1}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_fingerprints_ignore_typed_text_but_not_handles() {
        let a = ActionKind::Input {
            handle: Handle(3),
            text: "a".into(),
            clear: true,
        };
        let b = ActionKind::Input {
            handle: Handle(3),
            text: "b".into(),
            clear: true,
        };
        let c = ActionKind::Click { handle: Handle(3) };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        let nav1 = ActionKind::Navigate { url: "https://a.test".into() };
        let nav2 = ActionKind::Navigate { url: "https://b.test".into() };
        assert_ne!(nav1.fingerprint(), nav2.fingerprint());
    }

    #[test]
    fn test_terminal_results_carry_summary() {
        let result = ActionResult::terminal("terminate success=true", true, "done");
        assert!(result.is_terminal);
        assert_eq!(result.terminal_success, Some(true));
        assert_eq!(result.extracted_content.as_deref(), Some("done"));
    }
}
