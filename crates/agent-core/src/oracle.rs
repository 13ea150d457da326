//! Oracle seam: the planning collaborator consulted once per step.
//!
//! The oracle returns raw text; parsing and repair happen in the loop so
//! every implementation gets the same tolerance.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::agent_loop::prompt::{format_system_prompt, format_user_message};
use crate::agent_loop::PlanningContext;
use crate::errors::AgentError;

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Produces the raw decision text for one planning context.
    async fn decide(&self, ctx: &PlanningContext) -> Result<String, AgentError>;
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn decide(&self, ctx: &PlanningContext) -> Result<String, AgentError> {
        (**self).decide(ctx).await
    }
}

/// Replays a fixed list of replies, recording every context it was shown.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<PlanningContext>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// One reply per decision, serialized as JSON.
    pub fn from_decisions(decisions: impl IntoIterator<Item = Value>) -> Self {
        decisions
            .into_iter()
            .fold(Self::new(), |oracle, decision| oracle.with_reply(decision.to_string()))
    }

    pub fn with_reply(self, raw: impl Into<String>) -> Self {
        self.replies.lock().push_back(Ok(raw.into()));
        self
    }

    /// Queues a transport failure.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.replies.lock().push_back(Err(message.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn contexts(&self) -> Vec<PlanningContext> {
        self.seen.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, ctx: &PlanningContext) -> Result<String, AgentError> {
        self.seen.lock().push(ctx.clone());
        match self.replies.lock().pop_front() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(message)) => Err(AgentError::oracle(message)),
            None => Err(AgentError::oracle(format!(
                "script exhausted at step {}",
                ctx.step
            ))),
        }
    }
}

type DecideFn = dyn Fn(&PlanningContext) -> Result<String, AgentError> + Send + Sync;

/// Oracle backed by a closure, for policies computed from the context.
pub struct FnOracle {
    decide: Box<DecideFn>,
}

impl FnOracle {
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(&PlanningContext) -> Result<String, AgentError> + Send + Sync + 'static,
    {
        Self {
            decide: Box::new(decide),
        }
    }
}

#[async_trait]
impl Oracle for FnOracle {
    async fn decide(&self, ctx: &PlanningContext) -> Result<String, AgentError> {
        (self.decide)(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOracleConfig {
    /// URL the planning request is POSTed to.
    pub endpoint: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700/decide".to_string(),
            api_key_env: Some("QAPILOT_ORACLE_KEY".to_string()),
            model: None,
            timeout_ms: 60_000,
        }
    }
}

/// POSTs the planning request as JSON; the response body is the decision.
pub struct HttpOracle {
    config: HttpOracleConfig,
    api_key: Option<String>,
    client: Client,
    vision: bool,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig, vision: bool) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| AgentError::oracle(format!("failed to build HTTP client: {err}")))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());
        Ok(Self {
            config,
            api_key,
            client,
            vision,
        })
    }

    pub fn config(&self) -> &HttpOracleConfig {
        &self.config
    }
}

/// Request body sent to the HTTP oracle.
pub fn request_body(ctx: &PlanningContext, model: Option<&str>, vision: bool) -> Value {
    let mut body = json!({
        "system": format_system_prompt(vision && ctx.screenshot.is_some()),
        "user": format_user_message(ctx),
        "task": ctx.task,
        "step": ctx.step,
        "generation": ctx.generation,
        "url": ctx.url,
    });
    if let Some(model) = model {
        body["model"] = Value::from(model);
    }
    if let Some(bytes) = ctx.screenshot.as_deref().filter(|_| vision) {
        body["screenshot"] = Value::from(STANDARD.encode(bytes));
    }
    body
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn decide(&self, ctx: &PlanningContext) -> Result<String, AgentError> {
        let body = request_body(ctx, self.config.model.as_deref(), self.vision);
        debug!(endpoint = %self.config.endpoint, step = ctx.step, "Calling oracle");

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AgentError::oracle(format!("request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| AgentError::oracle(format!("unreadable response: {err}")))?;

        if !status.is_success() {
            warn!(%status, step = ctx.step, "Oracle returned an error status");
            return Err(AgentError::oracle(format!("oracle returned {status}: {text}")));
        }
        Ok(text)
    }
}
