//! Run boundary: one task against one browser session.

use std::sync::Arc;

use agent_core::{AgentLoopConfig, ChecklistStore, Oracle, RunOutcome, WorkflowScheduler};
use anyhow::{Context, Result};
use browser_port::BrowserSession;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Per-run parameters; budgets left unset fall back to the configuration.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task: String,
    pub start_url: Option<String>,
    pub max_steps: Option<u32>,
    pub max_failures: Option<u32>,
}

impl RunRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }

    pub fn max_steps(mut self, steps: u32) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn max_failures(mut self, failures: u32) -> Self {
        self.max_failures = Some(failures);
        self
    }
}

/// Owns the oracle and collaborators shared by the runs it starts.
pub struct Runner {
    config: AgentLoopConfig,
    oracle: Arc<dyn Oracle>,
    checklist: Option<Arc<dyn ChecklistStore>>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(config: AgentLoopConfig, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            config,
            oracle,
            checklist: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_checklist(mut self, store: Arc<dyn ChecklistStore>) -> Self {
        self.checklist = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs `request` to its outcome. Errors only when the effective
    /// configuration is invalid; everything that happens inside the run is
    /// reported through the outcome.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        request: &RunRequest,
    ) -> Result<RunOutcome> {
        let mut config = self.config.clone();
        if let Some(steps) = request.max_steps {
            config.max_steps = steps;
        }
        if let Some(failures) = request.max_failures {
            config.max_failures = failures;
        }

        let mut scheduler = WorkflowScheduler::new(config, self.oracle.clone())
            .context("invalid run configuration")?
            .with_cancellation(self.cancel.clone());
        if let Some(store) = &self.checklist {
            scheduler = scheduler.with_checklist(store.clone());
        }

        info!(task = %request.task, start_url = ?request.start_url, "Run requested");
        Ok(scheduler
            .run(session, &request.task, request.start_url.as_deref())
            .await)
    }
}

/// `run(task, start_url?, max_steps?, max_failures?)` with default
/// configuration for everything else.
pub async fn run(
    session: &dyn BrowserSession,
    oracle: Arc<dyn Oracle>,
    task: &str,
    start_url: Option<&str>,
    max_steps: Option<u32>,
    max_failures: Option<u32>,
) -> Result<RunOutcome> {
    let request = RunRequest {
        task: task.to_string(),
        start_url: start_url.map(str::to_string),
        max_steps,
        max_failures,
    };
    Runner::new(AgentLoopConfig::default(), oracle)
        .run(session, &request)
        .await
}
