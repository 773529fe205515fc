//! Project runners: the strategies that turn a project record into a
//! supervised running thing. Native projects run as OS process groups;
//! containerised projects have a placeholder strategy.

pub mod buffer;
pub mod container;
pub mod native;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{LogEntry, LogLevel, Project, ProjectType, Status};

pub use buffer::{LogBuffer, LOG_BUFFER_CAPACITY};
pub use container::ContainerRunner;
pub use native::NativeRunner;

/// How long a stop request waits for a cooperative exit before killing.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Durable destination for captured output lines.
pub type LogSink = Arc<dyn Fn(LogLevel, String) + Send + Sync>;

/// Receives the terminal status (and an error message, if any) once a
/// supervised process is gone.
pub type ExitCallback = Arc<dyn Fn(Status, Option<String>) + Send + Sync>;

/// Callbacks attached to one run of a project. They live exactly as long as
/// the run's monitor task.
#[derive(Clone, Default)]
pub struct RunnerHooks {
    pub log_sink: Option<LogSink>,
    pub on_exit: Option<ExitCallback>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("project '{0}' is already running")]
    AlreadyRunning(String),

    #[error("project '{0}' is not running")]
    NotRunning(String),

    #[error("project '{0}' has no dev script")]
    NoDevScript(String),

    #[error("project directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to spawn project '{project}': {source}")]
    Spawn {
        project: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture {stream} of project '{project}'")]
    MissingPipe {
        project: String,
        stream: &'static str,
    },

    #[error("{0} projects are not supported yet")]
    Unsupported(ProjectType),
}

/// Point-in-time view of one project as its runner sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerStatus {
    pub project_id: String,
    pub status: Status,
    pub pid: u32,
    pub port: Option<u16>,
    pub uptime: Option<Duration>,
    pub message: String,
}

#[async_trait]
pub trait ProjectRunner: Send + Sync {
    /// Launch the project and return its pid. Returns as soon as the process
    /// is spawned.
    async fn start(&self, project: &Project, hooks: RunnerHooks) -> Result<u32, RunnerError>;

    async fn stop(&self, project_id: &str) -> Result<(), RunnerError>;

    async fn status(&self, project_id: &str) -> RunnerStatus;

    async fn logs(&self, project_id: &str, tail: Option<usize>) -> Vec<LogEntry>;

    async fn is_running(&self, project_id: &str) -> bool;

    async fn restart(&self, project: &Project, hooks: RunnerHooks) -> Result<u32, RunnerError> {
        match self.stop(&project.id).await {
            Ok(()) | Err(RunnerError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(project, hooks).await
    }
}
