//! Scenario replay
//!
//! A scenario bundles a task, in-memory pages and the oracle's scripted
//! decisions. Replaying it drives the real decision loop end to end without
//! a browser or a model, then checks the outcome against the scenario's
//! expectations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{
    AgentLoopConfig, ChecklistStore, MemoryChecklist, Oracle, RunOutcome, ScriptedOracle,
    TerminationReason,
};
use browser_port::memory::{MemoryPage, MemorySession};
use browser_port::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::runner::{RunRequest, Runner};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error("scenario session could not be opened: {0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    Run(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub task: String,
    /// Navigated to before the first step; without it the run starts on the
    /// first page.
    #[serde(default)]
    pub start_url: Option<String>,
    pub pages: Vec<MemoryPage>,
    /// One oracle reply per step. Strings are sent verbatim, anything else
    /// is serialized as JSON.
    #[serde(default)]
    pub decisions: Vec<Value>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    /// Initial checklist document.
    #[serde(default)]
    pub checklist: Option<String>,
    #[serde(default)]
    pub expect: ScenarioExpect,
}

/// Outcome fields a replay must reproduce; unset fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioExpect {
    pub completed: Option<bool>,
    pub success: Option<bool>,
    pub step_count: Option<u32>,
    pub termination: Option<TerminationReason>,
    pub final_url: Option<String>,
}

impl ScenarioExpect {
    /// Human-readable differences between the expectation and `outcome`.
    pub fn check(&self, outcome: &RunOutcome) -> Vec<String> {
        let mut mismatches = Vec::new();
        if let Some(completed) = self.completed {
            if completed != outcome.completed {
                mismatches.push(format!(
                    "completed: expected {completed}, got {}",
                    outcome.completed
                ));
            }
        }
        if let Some(success) = self.success {
            if success != outcome.success {
                mismatches.push(format!(
                    "success: expected {success}, got {}",
                    outcome.success
                ));
            }
        }
        if let Some(steps) = self.step_count {
            if steps != outcome.step_count {
                mismatches.push(format!(
                    "step_count: expected {steps}, got {}",
                    outcome.step_count
                ));
            }
        }
        if let Some(reason) = self.termination {
            if reason != outcome.termination() {
                mismatches.push(format!(
                    "termination: expected {reason:?}, got {:?}",
                    outcome.termination()
                ));
            }
        }
        if let Some(url) = &self.final_url {
            if *url != outcome.report.final_url {
                mismatches.push(format!(
                    "final_url: expected {url}, got {}",
                    outcome.report.final_url
                ));
            }
        }
        mismatches
    }
}

impl Scenario {
    pub fn from_yaml(raw: &str) -> Result<Self, ReplayError> {
        let scenario: Scenario = serde_yaml::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub async fn load(path: &Path) -> Result<Self, ReplayError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ReplayError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut scenario = Self::from_yaml(&raw)?;
        if scenario.name.is_none() {
            scenario.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        debug!(path = %path.display(), pages = scenario.pages.len(), "Scenario loaded");
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.task.trim().is_empty() {
            return Err(ReplayError::Invalid("task must not be empty".into()));
        }
        if self.pages.is_empty() {
            return Err(ReplayError::Invalid("at least one page is required".into()));
        }
        if let Some(url) = &self.start_url {
            if !self.pages.iter().any(|page| &page.url == url) {
                return Err(ReplayError::Invalid(format!(
                    "start_url {url} is not one of the scenario pages"
                )));
            }
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("scenario")
    }

    /// Oracle replaying the scripted decisions in order.
    pub fn oracle(&self) -> ScriptedOracle {
        self.decisions
            .iter()
            .fold(ScriptedOracle::new(), |oracle, decision| match decision {
                Value::String(raw) => oracle.with_reply(raw.clone()),
                other => oracle.with_reply(other.to_string()),
            })
    }

    /// Fresh session over the scenario pages.
    pub fn session(&self) -> Result<MemorySession, ReplayError> {
        let pages = self.pages.clone();
        match (&self.start_url, self.pages.first()) {
            (Some(_), _) => Ok(MemorySession::new(pages)),
            (None, Some(first)) => {
                let url = first.url.clone();
                Ok(MemorySession::opened_at(pages, &url)?)
            }
            (None, None) => Err(ReplayError::Invalid("at least one page is required".into())),
        }
    }

    fn request(&self, overrides: &ReplayOptions) -> RunRequest {
        RunRequest {
            task: self.task.clone(),
            start_url: self.start_url.clone(),
            max_steps: overrides.max_steps.or(self.max_steps),
            max_failures: overrides.max_failures.or(self.max_failures),
        }
    }
}

/// Knobs a caller may set on top of the scenario file.
#[derive(Clone, Default)]
pub struct ReplayOptions {
    pub max_steps: Option<u32>,
    pub max_failures: Option<u32>,
    /// Replaces the scripted decisions, e.g. with a live oracle.
    pub oracle: Option<Arc<dyn Oracle>>,
    /// Replaces the scenario's in-memory checklist.
    pub checklist: Option<Arc<dyn ChecklistStore>>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub scenario: String,
    pub outcome: RunOutcome,
    pub mismatches: Vec<String>,
    /// Scripted decisions the run never asked for.
    pub unused_decisions: usize,
}

impl ReplayReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Replays `scenario` through the decision loop.
pub async fn replay(
    scenario: &Scenario,
    config: &AgentLoopConfig,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let session = scenario.session()?;
    let scripted = Arc::new(scenario.oracle());
    let oracle: Arc<dyn Oracle> = match &options.oracle {
        Some(oracle) => oracle.clone(),
        None => scripted.clone(),
    };
    let checklist: Arc<dyn ChecklistStore> = match &options.checklist {
        Some(store) => store.clone(),
        None => Arc::new(match &scenario.checklist {
            Some(contents) => MemoryChecklist::with_contents(contents.clone()),
            None => MemoryChecklist::new(),
        }),
    };

    let mut runner = Runner::new(config.clone(), oracle).with_checklist(checklist);
    if let Some(token) = &options.cancel {
        runner = runner.with_cancellation(token.clone());
    }

    info!(scenario = scenario.display_name(), "Replaying scenario");
    let outcome = runner
        .run(&session, &scenario.request(&options))
        .await
        .map_err(|err| ReplayError::Run(format!("{err:#}")))?;

    let mismatches = scenario.expect.check(&outcome);
    let unused_decisions = if options.oracle.is_some() {
        0
    } else {
        scripted.remaining()
    };
    info!(
        scenario = scenario.display_name(),
        completed = outcome.completed,
        success = outcome.success,
        steps = outcome.step_count,
        mismatches = mismatches.len(),
        "Replay finished"
    );

    Ok(ReplayReport {
        scenario: scenario.display_name().to_string(),
        outcome,
        mismatches,
        unused_decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
name: submit
task: click the button labeled Submit
start_url: https://app.test/form
pages:
  - url: https://app.test/form
    title: Form
    root:
      node_id: 1
      tag: body
      children:
        - { node_id: 2, tag: button, text: Submit }
    behaviors:
      - node_id: 2
        effect: { kind: navigate, url: "https://app.test/done" }
  - url: https://app.test/done
    title: Done
    root: { node_id: 1, tag: body, children: [{ node_id: 3, tag: p, text: Thanks }] }
decisions:
  - actions: [{ action: click, handle: 1 }]
    expect: { all: [url_changes] }
  - '{"actions": [{"action": "done", "done_success": true, "done_text": "submitted"}]}'
expect:
  completed: true
  success: true
  step_count: 2
  termination: done
  final_url: https://app.test/done
"#;

    #[test]
    fn test_scenario_parses() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        assert_eq!(scenario.display_name(), "submit");
        assert_eq!(scenario.pages.len(), 2);
        assert_eq!(scenario.decisions.len(), 2);
        assert_eq!(scenario.expect.termination, Some(TerminationReason::Done));
    }

    #[test]
    fn test_unknown_start_url_is_rejected() {
        let raw = SCENARIO.replace(
            "start_url: https://app.test/form",
            "start_url: https://app.test/nowhere",
        );
        assert!(matches!(
            Scenario::from_yaml(&raw),
            Err(ReplayError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_meets_expectations() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        let report = replay(&scenario, &AgentLoopConfig::fast(), ReplayOptions::default())
            .await
            .unwrap();
        assert!(report.passed(), "{:?}", report.mismatches);
        assert_eq!(report.unused_decisions, 0);
        assert_eq!(report.outcome.report.summary, "submitted");
    }

    #[tokio::test]
    async fn test_mismatches_are_reported() {
        let mut scenario = Scenario::from_yaml(SCENARIO).unwrap();
        scenario.expect.step_count = Some(5);
        scenario.expect.success = Some(false);
        let report = replay(&scenario, &AgentLoopConfig::fast(), ReplayOptions::default())
            .await
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.mismatches.len(), 2);
        assert!(report.mismatches[0].starts_with("success"));
    }

    #[tokio::test]
    async fn test_options_override_budget() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        let options = ReplayOptions {
            max_steps: Some(1),
            ..Default::default()
        };
        let report = replay(&scenario, &AgentLoopConfig::fast(), options)
            .await
            .unwrap();
        assert_eq!(report.outcome.termination(), TerminationReason::StepBudget);
        assert_eq!(report.outcome.step_count, 1);
        assert_eq!(report.unused_decisions, 1);
    }
}
