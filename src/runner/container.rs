use async_trait::async_trait;

use super::{ProjectRunner, RunnerError, RunnerHooks, RunnerStatus};
use crate::domain::{LogEntry, Project, ProjectType, Status};

/// Placeholder strategy for containerised projects. Every lifecycle call
/// fails with `Unsupported`; status and logs answer as "never running".
#[derive(Debug, Default)]
pub struct ContainerRunner;

#[async_trait]
impl ProjectRunner for ContainerRunner {
    async fn start(&self, project: &Project, _hooks: RunnerHooks) -> Result<u32, RunnerError> {
        tracing::warn!(project = %project.id, "container projects cannot be started");
        Err(RunnerError::Unsupported(project.project_type))
    }

    async fn stop(&self, _project_id: &str) -> Result<(), RunnerError> {
        Err(RunnerError::Unsupported(ProjectType::Docker))
    }

    async fn status(&self, project_id: &str) -> RunnerStatus {
        RunnerStatus {
            project_id: project_id.to_string(),
            status: Status::Unknown,
            pid: 0,
            port: None,
            uptime: None,
            message: "container runtime not supported".to_string(),
        }
    }

    async fn logs(&self, _project_id: &str, _tail: Option<usize>) -> Vec<LogEntry> {
        Vec::new()
    }

    async fn is_running(&self, _project_id: &str) -> bool {
        false
    }
}
