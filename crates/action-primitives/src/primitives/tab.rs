//! Switch-tab primitive

use browser_port::{BrowserSession, TabTarget};

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_switch_tab(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    target: &TabTarget,
) -> Result<ActionOutput, ActionError> {
    let tab = executor
        .guarded("switch_tab", session.switch_tab(target))
        .await?;
    executor.ledger().clear();
    Ok(ActionOutput {
        content: Some(format!("active tab is now {tab}")),
        mutated: true,
        opened_tab: matches!(target, TabTarget::New).then_some(tab),
    })
}
