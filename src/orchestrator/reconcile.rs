use tracing::{info, warn};

use crate::domain::{LogLevel, Status};
use crate::platform;

use super::{ports, Orchestrator, OrchestratorError};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Projects whose record was reset to `Stopped`.
    pub cleaned: Vec<String>,
    /// Processes that were signalled, as `(project, pid)`.
    pub killed: Vec<(String, u32)>,
    /// Kill attempts that failed, as `(project, reason)`.
    pub failures: Vec<(String, String)>,
}

impl Orchestrator {
    /// Kill processes left behind by an earlier session and reset their
    /// records. Run once before serving lifecycle requests. Failures on one
    /// project never stop the pass.
    pub async fn reconcile_orphans(&self) -> Result<ReconcileReport, OrchestratorError> {
        let mut report = ReconcileReport::default();
        let own_pid = std::process::id();

        for mut project in self.store.list()? {
            let id = project.id.clone();
            if self.runner_for(project.project_type).is_running(&id).await {
                continue;
            }
            let mut dirty = matches!(project.status, Status::Running | Status::Starting);

            if project.pid > 0 {
                dirty = true;
                match platform::kill_pid(project.pid) {
                    Ok(()) => {
                        info!(project = %id, pid = project.pid, "killed orphaned process");
                        report.killed.push((id.clone(), project.pid));
                    }
                    Err(e) => {
                        warn!(project = %id, pid = project.pid, error = %e, "failed to kill orphaned process");
                        report.failures.push((id.clone(), format!("{e:#}")));
                    }
                }
            }

            if let Some(port) = project.port {
                match ports::check_port(port) {
                    Some(conflict) if conflict.pid == own_pid => {
                        warn!(project = %id, port, "port held by this process, not killing");
                    }
                    Some(conflict) => {
                        dirty = true;
                        match platform::kill_pid(conflict.pid) {
                            Ok(()) => {
                                info!(project = %id, port, pid = conflict.pid, command = %conflict.command, "killed process holding project port");
                                report.killed.push((id.clone(), conflict.pid));
                            }
                            Err(e) => {
                                warn!(project = %id, port, pid = conflict.pid, error = %e, "failed to kill port holder");
                                report.failures.push((id.clone(), format!("{e:#}")));
                            }
                        }
                    }
                    None => {}
                }
            }

            if !dirty {
                continue;
            }
            project.pid = 0;
            project.update_status(Status::Stopped);
            if let Err(e) = self.store.save(&project) {
                warn!(project = %id, error = %e, "failed to reset orphaned project");
                report.failures.push((id, e.to_string()));
                continue;
            }
            self.persist_log(&id, LogLevel::Info, "reset after orphan cleanup");
            report.cleaned.push(id);
        }

        info!(
            cleaned = report.cleaned.len(),
            killed = report.killed.len(),
            failures = report.failures.len(),
            "orphan reconciliation finished"
        );
        Ok(report)
    }
}
