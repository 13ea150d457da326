//! Two-step selection primitives
//!
//! `list_options` is read-only and records what the widget offered;
//! `choose_option` is only accepted for a string recorded that way.

use std::collections::HashMap;

use browser_port::BrowserSession;
use parking_lot::Mutex;
use perceiver_structural::{ElementDescriptor, ElementIndex};
use qapilot_core_types::NodeId;
use tracing::{debug, info};

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;
use crate::types::SelectTarget;

/// Options returned by `list_options`, keyed by page and node.
#[derive(Default)]
pub(crate) struct OptionLedger {
    listed: Mutex<HashMap<(String, NodeId), Vec<String>>>,
}

impl OptionLedger {
    fn record(&self, url: &str, node: NodeId, options: Vec<String>) {
        self.listed.lock().insert((url.to_string(), node), options);
    }

    fn listed(&self, url: &str, node: NodeId) -> Option<Vec<String>> {
        self.listed.lock().get(&(url.to_string(), node)).cloned()
    }

    pub(crate) fn clear(&self) {
        self.listed.lock().clear();
    }
}

/// Resolves a handle or a by-text request to exactly one element.
fn resolve_target<'i>(
    executor: &ActionExecutor,
    index: &'i ElementIndex,
    target: &SelectTarget,
) -> Result<&'i ElementDescriptor, ActionError> {
    let query = match target {
        SelectTarget::Handle(handle) => return executor.resolve(index, *handle),
        SelectTarget::Label(query) => query,
    };

    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(ActionError::validation("selection target text is empty"));
    }
    let candidates: Vec<&ElementDescriptor> = index
        .iter()
        .filter(|el| el.is_select_like() && names_match(el, &needle))
        .collect();

    match candidates.as_slice() {
        [] => Err(ActionError::validation(format!(
            "no selection widget matches '{query}'"
        ))),
        [only] => Ok(*only),
        _ => Err(ActionError::AmbiguousTarget {
            query: query.clone(),
            candidates: candidates.iter().map(|el| el.handle).collect(),
        }),
    }
}

fn names_match(element: &ElementDescriptor, needle: &str) -> bool {
    std::iter::once(element.text.as_str())
        .chain(
            ["aria-label", "name", "placeholder", "id", "title"]
                .iter()
                .filter_map(|key| element.attributes.get(key)),
        )
        .any(|name| name.to_lowercase().contains(needle))
}

pub(crate) async fn execute_list_options(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    index: &ElementIndex,
    target: &SelectTarget,
) -> Result<ActionOutput, ActionError> {
    let element = resolve_target(executor, index, target)?;
    executor.ensure_interactable(session, element).await?;

    let options = executor
        .guarded("list_options", session.list_options(element.node_id))
        .await?;
    info!(handle = %element.handle, count = options.len(), "Listed options");

    let rendered = serde_json::to_string(&options)
        .map_err(|err| ActionError::Session(format!("unserializable options: {err}")))?;
    executor
        .ledger()
        .record(index.url(), element.node_id, options);
    Ok(ActionOutput::read(rendered))
}

pub(crate) async fn execute_choose_option(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    index: &ElementIndex,
    target: &SelectTarget,
    text: &str,
) -> Result<ActionOutput, ActionError> {
    let element = resolve_target(executor, index, target)?;

    let listed = executor
        .ledger()
        .listed(index.url(), element.node_id)
        .ok_or_else(|| {
            ActionError::validation(format!(
                "options of {} were never listed; call list_options first",
                element.handle
            ))
        })?;
    if !listed.iter().any(|option| option == text) {
        return Err(ActionError::validation(format!(
            "'{text}' was not among the listed options of {}: {listed:?}",
            element.handle
        )));
    }

    executor.ensure_interactable(session, element).await?;
    debug!(handle = %element.handle, option = text, "Choosing option");
    executor
        .guarded("choose_option", session.choose_option(element.node_id, text))
        .await?;
    Ok(ActionOutput::mutation())
}
