use std::time::Duration;

use async_trait::async_trait;
use qapilot_core_types::{NodeId, SessionId, TabId};

use crate::errors::SessionError;
use crate::model::{ActivitySample, ClickOutcome, PageSnapshot, TabTarget};

/// A live browser session owned by exactly one run.
///
/// Element-level commands take a [`NodeId`]; translating the oracle's
/// handles into node ids is the element index's job, never the session's.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn session_id(&self) -> &SessionId;

    /// Raw tree of the active tab.
    async fn snapshot(&self) -> Result<PageSnapshot, SessionError>;

    /// In-flight requests and DOM mutation counter, sampled now.
    async fn activity(&self) -> Result<ActivitySample, SessionError>;

    async fn current_url(&self) -> Result<String, SessionError>;

    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    async fn click(&self, node: NodeId) -> Result<ClickOutcome, SessionError>;

    async fn input(&self, node: NodeId, text: &str, clear: bool) -> Result<(), SessionError>;

    /// Read-only: the option labels a selection widget offers.
    async fn list_options(&self, node: NodeId) -> Result<Vec<String>, SessionError>;

    async fn choose_option(&self, node: NodeId, text: &str) -> Result<(), SessionError>;

    async fn scroll(&self, amount: i32) -> Result<(), SessionError>;

    async fn extract(&self, query: &str) -> Result<String, SessionError>;

    async fn wait(&self, duration: Duration) -> Result<(), SessionError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn switch_tab(&self, target: &TabTarget) -> Result<TabId, SessionError>;

    /// Re-checks reachability of a node at call time.
    async fn is_interactable(&self, node: NodeId) -> Result<bool, SessionError>;

    async fn screenshot(&self) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(None)
    }

    /// Releases the underlying browser resources. Further calls fail with
    /// [`SessionError::Released`].
    async fn release(&self) -> Result<(), SessionError>;
}
