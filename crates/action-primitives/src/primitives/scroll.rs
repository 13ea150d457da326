//! Scroll primitive

use browser_port::BrowserSession;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_scroll(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    amount: i32,
) -> Result<ActionOutput, ActionError> {
    if amount == 0 {
        return Err(ActionError::validation("scroll amount must be non-zero"));
    }
    executor.guarded("scroll", session.scroll(amount)).await?;
    Ok(ActionOutput::mutation())
}
