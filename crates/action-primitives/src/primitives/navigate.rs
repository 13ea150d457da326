//! Navigate primitive

use browser_port::BrowserSession;
use tracing::debug;
use url::Url;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_navigate(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    url: &str,
) -> Result<ActionOutput, ActionError> {
    let parsed = Url::parse(url)
        .map_err(|err| ActionError::validation(format!("'{url}' is not a valid URL: {err}")))?;

    debug!(url = %parsed, "Navigating");
    executor
        .guarded("navigate", session.navigate(parsed.as_str()))
        .await?;
    executor.ledger().clear();
    Ok(ActionOutput::mutation())
}
