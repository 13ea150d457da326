//! Click primitive

use browser_port::BrowserSession;
use perceiver_structural::ElementIndex;
use qapilot_core_types::Handle;
use tracing::debug;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

/// Steps:
/// 1. Resolve the handle in the current index
/// 2. Re-check the element is interactable
/// 3. Click through the session, noting any tab the click opened
pub(crate) async fn execute_click(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    index: &ElementIndex,
    handle: Handle,
) -> Result<ActionOutput, ActionError> {
    let element = executor.resolve(index, handle)?;
    executor.ensure_interactable(session, element).await?;

    debug!(handle = %handle, node = %element.node_id, "Clicking element");
    let outcome = executor.guarded("click", session.click(element.node_id)).await?;

    Ok(ActionOutput {
        content: outcome
            .opened_tab
            .as_ref()
            .map(|tab| format!("click opened new tab {tab}")),
        mutated: true,
        opened_tab: outcome.opened_tab,
    })
}
