//! Action executor
//!
//! One primitive per [`ActionKind`] variant:
//! 1. navigate - load a URL in the active tab
//! 2. click - click an indexed element
//! 3. input - type into an indexed element
//! 4. list_options / choose_option - two-step selection
//! 5. scroll - scroll the viewport
//! 6. extract - read page text
//! 7. wait - explicit pause
//! 8. switch_tab - activate or open a tab
//!
//! `terminate` never touches the session.

mod click;
mod extract;
mod navigate;
mod scroll;
mod select;
mod tab;
mod type_text;
mod wait;

use std::future::Future;
use std::time::{Duration, Instant};

use browser_port::{BrowserSession, SessionError};
use chrono::Utc;
use perceiver_structural::{ElementDescriptor, ElementIndex};
use qapilot_core_types::{Handle, TabId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    errors::ActionError,
    types::{ActionKind, ActionRequest, ActionResult},
};

use select::OptionLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on a single session command (milliseconds)
    pub command_timeout_ms: u64,
    /// Longest explicit wait the oracle may request (milliseconds)
    pub max_wait_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 15_000,
            max_wait_ms: 10_000,
        }
    }
}

/// What a primitive produced before it is wrapped into an [`ActionResult`].
#[derive(Debug, Default)]
pub(crate) struct ActionOutput {
    pub content: Option<String>,
    pub mutated: bool,
    pub opened_tab: Option<TabId>,
}

impl ActionOutput {
    fn read(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    fn mutation() -> Self {
        Self {
            mutated: true,
            ..Default::default()
        }
    }
}

/// Resolves handles against the current index and drives the session.
///
/// Owned by a single run; the listed-options ledger is per run.
pub struct ActionExecutor {
    config: ExecutorConfig,
    ledger: OptionLedger,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ActionExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            ledger: OptionLedger::default(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes one request. Never panics and never returns a bare error:
    /// failures come back as an error-status [`ActionResult`].
    pub async fn execute(
        &self,
        session: &dyn BrowserSession,
        request: &ActionRequest,
        index: &ElementIndex,
    ) -> ActionResult {
        let started_at = Utc::now();
        let start_instant = Instant::now();
        let label = request.kind.to_string();

        info!(
            session = %session.session_id(),
            generation = %request.generation,
            action = %label,
            "Executing action"
        );

        let result = match self.dispatch(session, request, index).await {
            Ok(output) => match &request.kind {
                ActionKind::Terminate { success, summary } => {
                    ActionResult::terminal(&label, *success, summary.clone())
                }
                _ => {
                    let mut result = ActionResult::success(&label)
                        .with_mutation(output.mutated)
                        .with_opened_tab(output.opened_tab);
                    result.extracted_content = output.content;
                    result
                }
            },
            Err(err) => {
                warn!(action = %label, error = %err, "Action failed");
                ActionResult::failure(&label, &err)
            }
        };
        result.with_timing(started_at, start_instant.elapsed().as_millis() as u64)
    }

    async fn dispatch(
        &self,
        session: &dyn BrowserSession,
        request: &ActionRequest,
        index: &ElementIndex,
    ) -> Result<ActionOutput, ActionError> {
        if request.generation != index.generation() {
            return Err(ActionError::StaleHandle {
                requested: request.generation,
                current: index.generation(),
            });
        }

        match &request.kind {
            ActionKind::Navigate { url } => navigate::execute_navigate(self, session, url).await,
            ActionKind::Click { handle } => click::execute_click(self, session, index, *handle).await,
            ActionKind::Input {
                handle,
                text,
                clear,
            } => type_text::execute_type_text(self, session, index, *handle, text, *clear).await,
            ActionKind::ListOptions { target } => {
                select::execute_list_options(self, session, index, target).await
            }
            ActionKind::ChooseOption { target, text } => {
                select::execute_choose_option(self, session, index, target, text).await
            }
            ActionKind::Scroll { amount } => scroll::execute_scroll(self, session, *amount).await,
            ActionKind::Extract { query } => extract::execute_extract(self, session, query).await,
            ActionKind::Wait { duration_ms } => {
                wait::execute_wait(self, session, *duration_ms).await
            }
            ActionKind::SwitchTab { tab } => tab::execute_switch_tab(self, session, tab).await,
            ActionKind::Terminate { .. } => Ok(ActionOutput::default()),
        }
    }

    /// Runs one session command under the command timeout.
    pub(crate) async fn guarded<T>(
        &self,
        what: &str,
        command: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, ActionError> {
        self.guarded_for(what, Duration::from_millis(self.config.command_timeout_ms), command)
            .await
    }

    pub(crate) async fn guarded_for<T>(
        &self,
        what: &str,
        limit: Duration,
        command: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, ActionError> {
        match tokio::time::timeout(limit, command).await {
            Ok(result) => result.map_err(ActionError::from),
            Err(_) => Err(ActionError::Timeout(format!(
                "{what} not acknowledged within {} ms",
                limit.as_millis()
            ))),
        }
    }

    pub(crate) fn resolve<'i>(
        &self,
        index: &'i ElementIndex,
        handle: Handle,
    ) -> Result<&'i ElementDescriptor, ActionError> {
        index.get(handle).ok_or_else(|| {
            ActionError::validation(format!(
                "{handle} does not exist in index {}",
                index.generation()
            ))
        })
    }

    /// Re-checks reachability at call time; the index may be a few hundred
    /// milliseconds old.
    pub(crate) async fn ensure_interactable(
        &self,
        session: &dyn BrowserSession,
        element: &ElementDescriptor,
    ) -> Result<(), ActionError> {
        let reachable = self
            .guarded("interactability check", session.is_interactable(element.node_id))
            .await?;
        if reachable {
            Ok(())
        } else {
            Err(ActionError::NotInteractable(format!(
                "{} <{}> '{}' is hidden, disabled or detached",
                element.handle,
                element.tag,
                element.label()
            )))
        }
    }

    pub(crate) fn ledger(&self) -> &OptionLedger {
        &self.ledger
    }
}
