use std::path::{Path, PathBuf};
use std::sync::Arc;

use qapilot::config::{default_config_path, Config};

pub struct CliContext {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    /// File the configuration was loaded from, if any.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Where the configuration lives or would live.
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(default_config_path)
    }
}
