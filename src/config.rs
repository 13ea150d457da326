//! Application configuration.
//!
//! Loaded from YAML, then overridden from the environment. Search order:
//! explicit path, `./config/qapilot.yaml`, `<config dir>/qapilot/config.yaml`,
//! built-in defaults.

use std::path::{Path, PathBuf};

use agent_core::{AgentLoopConfig, HttpOracleConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

pub const ENV_MAX_STEPS: &str = "QAPILOT_MAX_STEPS";
pub const ENV_MAX_FAILURES: &str = "QAPILOT_MAX_FAILURES";
pub const ENV_ORACLE_ENDPOINT: &str = "QAPILOT_ORACLE_ENDPOINT";

const LOCAL_CONFIG: &str = "config/qapilot.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentLoopConfig,
    pub oracle: HttpOracleConfig,
    pub logging: LoggingConfig,
    /// File the checklist collaborator reads and overwrites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit log lines as JSON objects.
    pub json: bool,
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = lookup(ENV_MAX_STEPS) {
            self.agent.max_steps = raw.trim().parse().with_context(|| {
                format!("{ENV_MAX_STEPS} must be a positive integer, got {raw:?}")
            })?;
            info!(max_steps = self.agent.max_steps, "max_steps overridden from environment");
        }
        if let Some(raw) = lookup(ENV_MAX_FAILURES) {
            self.agent.max_failures = raw.trim().parse().with_context(|| {
                format!("{ENV_MAX_FAILURES} must be a positive integer, got {raw:?}")
            })?;
            info!(
                max_failures = self.agent.max_failures,
                "max_failures overridden from environment"
            );
        }
        if let Some(endpoint) = lookup(ENV_ORACLE_ENDPOINT) {
            info!(endpoint = %endpoint, "Oracle endpoint overridden from environment");
            self.oracle.endpoint = endpoint;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate().context("invalid agent configuration")?;
        if self.oracle.endpoint.trim().is_empty() {
            anyhow::bail!("oracle.endpoint must not be empty");
        }
        if self.oracle.timeout_ms == 0 {
            anyhow::bail!("oracle.timeout_ms must be positive");
        }
        Ok(())
    }
}

pub struct LoadedConfig {
    pub config: Config,
    /// File the configuration came from; `None` when defaults were used.
    pub path: Option<PathBuf>,
}

/// Resolves the config file, parses it and applies environment overrides.
pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => {
            if !fs::try_exists(path).await.unwrap_or(false) {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => discover().await,
    };

    let mut config = match &path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config =
                Config::from_yaml(&raw).with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => {
            warn!("No config file found, using defaults");
            Config::default()
        }
    };

    config.apply_env_overrides()?;
    Ok(LoadedConfig { config, path })
}

async fn discover() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("qapilot");
        dir.push("config.yaml");
        candidates.push(dir);
    }
    for candidate in candidates {
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

/// Location a `config` subcommand reports when no file was loaded.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(LOCAL_CONFIG)
}
