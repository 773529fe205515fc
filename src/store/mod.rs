//! Durable storage for project records and their log entries.

mod json;
mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use crate::domain::{LogEntry, Project};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project '{0}' not found")]
    NotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence contract used by the orchestrator. Saves are last-write-wins:
/// whatever record is handed to `save` replaces the stored one wholesale.
pub trait ProjectRepository: Send + Sync {
    fn list(&self) -> Result<Vec<Project>, StoreError>;

    fn get(&self, id: &str) -> Result<Project, StoreError>;

    fn save(&self, project: &Project) -> Result<(), StoreError>;

    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Stored log entries for a project, oldest first. `tail` keeps only the
    /// most recent N.
    fn logs(&self, project_id: &str, tail: Option<usize>) -> Result<Vec<LogEntry>, StoreError>;
}

pub(crate) fn keep_tail<T>(mut items: Vec<T>, tail: Option<usize>) -> Vec<T> {
    if let Some(n) = tail {
        let skip = items.len().saturating_sub(n);
        items.drain(..skip);
    }
    items
}
