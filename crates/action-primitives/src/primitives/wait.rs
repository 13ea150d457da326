//! Wait primitive - explicit bounded pause

use std::time::Duration;

use browser_port::BrowserSession;
use tracing::warn;

use super::{ActionExecutor, ActionOutput};
use crate::errors::ActionError;

pub(crate) async fn execute_wait(
    executor: &ActionExecutor,
    session: &dyn BrowserSession,
    duration_ms: u64,
) -> Result<ActionOutput, ActionError> {
    let max_wait_ms = executor.config().max_wait_ms;
    let effective_ms = if duration_ms > max_wait_ms {
        warn!(requested_ms = duration_ms, max_wait_ms, "Clamping wait");
        max_wait_ms
    } else {
        duration_ms
    };

    let pause = Duration::from_millis(effective_ms);
    let limit = pause + Duration::from_millis(executor.config().command_timeout_ms);
    executor
        .guarded_for("wait", limit, session.wait(pause))
        .await?;
    Ok(ActionOutput::read(format!("waited {effective_ms} ms")))
}
