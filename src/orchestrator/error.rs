use crate::deps::DependencyError;
use crate::domain::{Dependency, ManifestError};
use crate::runner::RunnerError;
use crate::store::StoreError;

use super::ports::PortConflict;

/// Everything a lifecycle call can report back to its caller.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("project '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("project '{project}' has unsatisfied dependencies: {}", format_dependencies(.missing))]
    UnsatisfiedDependencies {
        project: String,
        missing: Vec<Dependency>,
    },

    /// Structured so callers can offer to kill the holder.
    #[error("{0}")]
    PortInUse(PortConflict),

    #[error("project '{0}' is already running")]
    AlreadyRunning(String),

    #[error("project '{0}' is not running")]
    NotRunning(String),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Process(RunnerError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<RunnerError> for OrchestratorError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::AlreadyRunning(id) => OrchestratorError::AlreadyRunning(id),
            RunnerError::NotRunning(id) => OrchestratorError::NotRunning(id),
            other => OrchestratorError::Process(other),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            other => OrchestratorError::Store(other),
        }
    }
}

fn format_dependencies(deps: &[Dependency]) -> String {
    deps.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
