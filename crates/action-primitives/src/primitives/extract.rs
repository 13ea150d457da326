//! Extract primitive - read page text

use browser_port::BrowserSession;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_extract(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    query: &str,
) -> Result<ActionOutput, ActionError> {
    let content = executor.guarded("extract", session.extract(query)).await?;
    Ok(ActionOutput::read(content))
}
