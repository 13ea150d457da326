//! Core data types for the decision loop.

use action_gate::{ExpectSpec, Verdict};
use action_primitives::{ActionFingerprint, ActionKind, ActionRequest, ActionResult};
use chrono::{DateTime, Utc};
use qapilot_core_types::Generation;
use serde::{Deserialize, Serialize};

/// One action as the oracle wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Generation the oracle planned against; defaults to the one it was shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,

    #[serde(flatten)]
    pub kind: ActionKind,
}

impl PlannedAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            generation: None,
            kind,
        }
    }

    /// Stamps the action with the generation it was planned against.
    pub fn to_request(&self, shown: Generation) -> ActionRequest {
        ActionRequest::new(self.generation.unwrap_or(shown), self.kind.clone())
    }
}

/// Oracle output for a single step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentDecision {
    /// Chain-of-thought reasoning about current state.
    #[serde(default)]
    pub thinking: String,

    /// Evaluation of whether the previous step achieved its goal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_previous_goal: Option<String>,

    /// Facts to carry into later steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default)]
    pub next_goal: String,

    #[serde(default)]
    pub actions: Vec<PlannedAction>,

    /// What the page should look like once the actions ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<ExpectSpec>,

    /// Replaces the checklist document wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<String>,
}

impl AgentDecision {
    /// First terminate action, as `(success, summary)`.
    pub fn terminate(&self) -> Option<(bool, &str)> {
        self.actions.iter().find_map(|action| match &action.kind {
            ActionKind::Terminate { success, summary } => Some((*success, summary.as_str())),
            _ => None,
        })
    }

    /// Keeps at most `max` actions ahead of the first terminate, which always
    /// survives the cap. Actions after a terminate never run and are
    /// dropped. Returns how many actions were removed.
    pub fn cap_actions(&mut self, max: usize) -> usize {
        let before = self.actions.len();
        let terminate = self
            .actions
            .iter()
            .position(|action| action.kind.is_terminate())
            .map(|at| {
                let terminate = self.actions.remove(at);
                self.actions.truncate(at);
                terminate
            });
        self.actions.truncate(max);
        self.actions.extend(terminate);
        before - self.actions.len()
    }

    /// Ends the run before anything executes.
    pub fn terminates_immediately(&self) -> bool {
        self.actions
            .first()
            .map(|action| action.kind.is_terminate())
            .unwrap_or(false)
    }

    /// Structural identity of the step, terminate excluded.
    pub fn fingerprint(&self) -> Vec<ActionFingerprint> {
        self.actions
            .iter()
            .filter(|action| !action.kind.is_terminate())
            .map(|action| action.kind.fingerprint())
            .collect()
    }

    pub fn describe_actions(&self) -> String {
        if self.actions.is_empty() {
            return "(none)".to_string();
        }
        self.actions
            .iter()
            .map(|action| action.kind.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Think,
    Act,
    Verify,
}

/// How a step counts toward the failure budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepClass {
    /// At least one action succeeded.
    Success,
    /// Nothing succeeded: errors, or no usable decision.
    Failure,
    /// Nothing executed, e.g. every request was stale.
    Neutral,
}

impl StepClass {
    pub fn from_results(results: &[ActionResult]) -> Self {
        let executed: Vec<_> = results
            .iter()
            .filter(|r| !r.is_stale() && !r.is_terminal)
            .collect();
        if executed.iter().any(|r| r.is_success()) {
            StepClass::Success
        } else if executed.is_empty() {
            StepClass::Neutral
        } else {
            StepClass::Failure
        }
    }
}

/// Entry in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step number (1-indexed).
    pub step: u32,

    /// Phase the step was closed in.
    pub phase: StepPhase,

    /// Index generation the decision was planned against.
    pub generation: Generation,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<AgentDecision>,

    #[serde(default)]
    pub results: Vec<ActionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    pub class: StepClass,

    /// Elements first seen after this step's actions.
    #[serde(default)]
    pub new_elements: usize,

    /// Short text carried into later planning contexts.
    pub summary: String,

    /// Non-fatal errors, verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// A step that ended in THINK without a usable decision.
    pub fn planner_failure(step: u32, generation: Generation, url: &str, error: String) -> Self {
        Self {
            step,
            phase: StepPhase::Think,
            generation,
            url: url.to_string(),
            decision: None,
            results: Vec::new(),
            verdict: None,
            class: StepClass::Failure,
            new_elements: 0,
            summary: format!("no usable decision: {error}"),
            errors: vec![error],
            recorded_at: Utc::now(),
        }
    }

    pub fn history_item(&self) -> HistoryItem {
        let decision = self.decision.as_ref();
        HistoryItem {
            step: self.step,
            url: self.url.clone(),
            actions: decision.map(AgentDecision::describe_actions),
            evaluation: decision.and_then(|d| d.evaluation_previous_goal.clone()),
            memory: decision.and_then(|d| d.memory.clone()),
            summary: self.summary.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// A previous step as the oracle sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub step: u32,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Restriction placed on the next decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Only a terminate action will be honored.
    TerminateOnly { reason: String },
}

impl Directive {
    pub fn instruction(&self) -> String {
        match self {
            Directive::TerminateOnly { reason } => format!(
                "{reason}. This is the final step: respond with a single terminate action \
                 reporting success or failure. Any other action ends the run as failed."
            ),
        }
    }
}

/// Everything the oracle receives for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningContext {
    pub task: String,
    pub step: u32,
    pub max_steps: u32,
    pub url: String,
    pub title: String,
    pub generation: Generation,

    /// Element index rendered as text.
    pub page: String,

    pub history: Vec<HistoryItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,

    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}
