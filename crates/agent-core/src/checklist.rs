//! Checklist collaborator: an opaque text document the oracle reads and
//! overwrites wholesale.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::AgentError;

#[async_trait]
pub trait ChecklistStore: Send + Sync {
    /// Current document, `None` when nothing was written yet.
    async fn read(&self) -> Result<Option<String>, AgentError>;

    async fn write(&self, contents: &str) -> Result<(), AgentError>;
}

/// Checklist kept in a file on disk.
#[derive(Debug, Clone)]
pub struct FileChecklist {
    path: PathBuf,
}

impl FileChecklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl ChecklistStore for FileChecklist {
    async fn read(&self) -> Result<Option<String>, AgentError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AgentError::checklist(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, contents: &str) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AgentError::checklist(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        tokio::fs::write(&self.path, contents).await.map_err(|err| {
            AgentError::checklist(format!("failed to write {}: {err}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), bytes = contents.len(), "Checklist written");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryChecklist {
    contents: Mutex<Option<String>>,
}

impl MemoryChecklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

#[async_trait]
impl ChecklistStore for MemoryChecklist {
    async fn read(&self) -> Result<Option<String>, AgentError> {
        Ok(self.contents.lock().clone())
    }

    async fn write(&self, contents: &str) -> Result<(), AgentError> {
        *self.contents.lock() = Some(contents.to_string());
        Ok(())
    }
}
