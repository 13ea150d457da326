//! Input primitive - type text into an indexed element

use browser_port::BrowserSession;
use perceiver_structural::ElementIndex;
use qapilot_core_types::Handle;
use tracing::debug;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_type_text(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    index: &ElementIndex,
    handle: Handle,
    text: &str,
    clear: bool,
) -> Result<ActionOutput, ActionError> {
    let element = executor.resolve(index, handle)?;
    if element.attributes.readonly {
        return Err(ActionError::NotInteractable(format!(
            "{handle} <{}> is read-only",
            element.tag
        )));
    }
    executor.ensure_interactable(session, element).await?;

    debug!(handle = %handle, chars = text.chars().count(), clear, "Typing text");
    executor
        .guarded("input", session.input(element.node_id, text, clear))
        .await?;
    Ok(ActionOutput::mutation())
}
