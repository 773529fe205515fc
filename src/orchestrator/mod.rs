//! Project lifecycle controller. The only place a project's persisted
//! status changes; runners and the dependency supervisor report back through
//! the hooks built here.

pub mod error;
pub mod ports;
pub mod reconcile;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::model::{DevhostConfig, ProjectConfig};
use crate::deps::{CommandChecker, DependencyChecker, ManagedDependencySupervisor};
use crate::domain::{parse_manifest, LogEntry, LogLevel, ManifestError, Project, ProjectType, Status};
use crate::platform;
use crate::proxy::ProxyConfigurator;
use crate::runner::{
    ContainerRunner, ExitCallback, LogBuffer, LogSink, NativeRunner, ProjectRunner, RunnerError,
    RunnerHooks, RunnerStatus,
};
use crate::store::{ProjectRepository, StoreError};

pub use error::OrchestratorError;
pub use ports::PortConflict;
pub use reconcile::ReconcileReport;

/// Project counts plus proxy liveness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub running: usize,
    pub stopped: usize,
    pub error: usize,
    pub proxy_running: bool,
}

/// Per-run bookkeeping shared between `start` and the exit hook.
#[derive(Default)]
struct RunHandle {
    pid: AtomicU32,
    exited: AtomicBool,
}

pub struct Orchestrator {
    store: Arc<dyn ProjectRepository>,
    checker: Arc<dyn DependencyChecker>,
    native: Arc<NativeRunner>,
    container: ContainerRunner,
    deps: Arc<ManagedDependencySupervisor>,
    proxy: Arc<ProxyConfigurator>,
    /// Serializes the final `Running` write of a start against exit hooks.
    persist: Arc<Mutex<()>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ProjectRepository>,
        checker: Arc<dyn DependencyChecker>,
        native: NativeRunner,
        deps: ManagedDependencySupervisor,
        proxy: ProxyConfigurator,
    ) -> Self {
        Self {
            store,
            checker,
            native: Arc::new(native),
            container: ContainerRunner,
            deps: Arc::new(deps),
            proxy: Arc::new(proxy),
            persist: Arc::new(Mutex::new(())),
        }
    }

    /// Wire up the default collaborators for a loaded configuration.
    pub fn from_config(
        config: &DevhostConfig,
        state_dir: &Path,
        store: Arc<dyn ProjectRepository>,
    ) -> Self {
        Self::new(
            store,
            Arc::new(CommandChecker::new()),
            NativeRunner::new(Arc::new(LogBuffer::default())),
            ManagedDependencySupervisor::new(config.managed_dependencies.clone()),
            ProxyConfigurator::new(config.proxy.clone(), state_dir),
        )
    }

    pub fn store(&self) -> &Arc<dyn ProjectRepository> {
        &self.store
    }

    pub fn native(&self) -> &Arc<NativeRunner> {
        &self.native
    }

    pub fn dependencies(&self) -> &ManagedDependencySupervisor {
        &self.deps
    }

    pub fn proxy(&self) -> &ProxyConfigurator {
        &self.proxy
    }

    fn runner_for(&self, project_type: ProjectType) -> &dyn ProjectRunner {
        if project_type.is_native() {
            self.native.as_ref()
        } else {
            &self.container
        }
    }

    fn persist_log(&self, project_id: &str, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(project_id, level, message);
        if let Err(e) = self.store.append_log(&entry) {
            warn!(project = %project_id, error = %e, "failed to persist log entry");
        }
    }

    /// Sink that writes every line into the durable log store.
    fn log_sink(&self, project_id: &str) -> LogSink {
        let store = Arc::clone(&self.store);
        let project_id = project_id.to_string();
        Arc::new(move |level, message| {
            let entry = LogEntry::new(&project_id, level, message);
            if let Err(e) = store.append_log(&entry) {
                warn!(project = %project_id, error = %e, "failed to persist log entry");
            }
        })
    }

    /// Exit hook for one run. Writes the terminal status unless a newer run
    /// already owns the record.
    fn exit_hook(&self, project_id: &str, run: Arc<RunHandle>) -> ExitCallback {
        let store = Arc::clone(&self.store);
        let proxy = Arc::clone(&self.proxy);
        let persist = Arc::clone(&self.persist);
        let project_id = project_id.to_string();
        Arc::new(move |status, message| {
            let _guard = persist.lock().unwrap_or_else(|e| e.into_inner());
            run.exited.store(true, Ordering::SeqCst);
            let pid = run.pid.load(Ordering::SeqCst);

            let mut project = match store.get(&project_id) {
                Ok(project) => project,
                Err(e) => {
                    warn!(project = %project_id, error = %e, "cannot record exit");
                    return;
                }
            };
            if project.pid != 0 && project.pid != pid {
                debug!(project = %project_id, pid, stored = project.pid, "exit of a superseded run");
                return;
            }
            if let Err(e) = proxy.remove_project(&project_id) {
                warn!(project = %project_id, error = %e, "failed to remove route");
            }
            project.pid = 0;
            match (status, message) {
                (Status::Error, message) => project.set_error(
                    message.unwrap_or_else(|| "process exited with an error".to_string()),
                ),
                (status, _) => project.update_status(status),
            }
            if let Err(e) = store.save(&project) {
                warn!(project = %project_id, error = %e, "failed to persist exit status");
            }
        })
    }

    /// Parse the project's manifest if it has not been parsed yet. A missing
    /// manifest is fine when configuration already supplies a dev script.
    fn resolve_manifest(&self, project: &mut Project) -> Result<(), OrchestratorError> {
        if project.manifest.is_some() {
            return Ok(());
        }
        match parse_manifest(&project.path) {
            Ok(manifest) => {
                project.apply_manifest(manifest);
                Ok(())
            }
            Err(ManifestError::NotFound(path)) if project.scripts.contains_key("dev") => {
                debug!(project = %project.id, path = %path.display(), "no manifest, using configured scripts");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh `satisfied` on every dependency. Managed ones are satisfied
    /// once the supervisor runs them; unconfigured managed ones are skipped.
    async fn verify_dependencies(&self, project: &mut Project) {
        let mut plain: Vec<_> = project
            .dependencies
            .iter()
            .filter(|d| !d.managed)
            .cloned()
            .collect();
        self.checker.check(&mut plain).await;
        let mut checked = plain.into_iter();

        for dep in project.dependencies.iter_mut() {
            if !dep.managed {
                if let Some(result) = checked.next() {
                    *dep = result;
                }
                continue;
            }
            if !self.deps.is_configured(&dep.name) {
                dep.satisfied = true;
                dep.message = Some("not configured, skipped".to_string());
            } else if self.deps.is_running(&dep.name).await {
                dep.satisfied = true;
                dep.message = None;
            } else {
                dep.satisfied = false;
                dep.message = Some("not running".to_string());
            }
        }
    }

    /// Managed dependency names declared by tracked projects other than
    /// `except`.
    async fn dependencies_in_use(&self, except: &str) -> HashSet<String> {
        let mut in_use = HashSet::new();
        for id in self.native.running_projects().await {
            if id == except {
                continue;
            }
            match self.store.get(&id) {
                Ok(project) => {
                    in_use.extend(project.managed_dependency_names().map(str::to_string))
                }
                Err(e) => warn!(project = %id, error = %e, "cannot read tracked project"),
            }
        }
        in_use
    }

    pub async fn start(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let mut project = self.store.get(project_id)?;
        self.resolve_manifest(&mut project)?;
        let id = project.id.clone();

        let runner = self.runner_for(project.project_type);
        if runner.is_running(&id).await {
            return Err(OrchestratorError::AlreadyRunning(id));
        }

        self.verify_dependencies(&mut project).await;
        let missing: Vec<_> = project
            .unsatisfied_dependencies()
            .into_iter()
            .filter(|d| !d.managed)
            .collect();
        if !missing.is_empty() {
            return Err(self.abort_unsatisfied(&project, missing));
        }

        if let Err(e) = self
            .deps
            .ensure_started(&project, Some(self.log_sink(&id)))
            .await
        {
            self.persist_log(
                &id,
                LogLevel::Error,
                format!("failed to start managed dependencies: {e}"),
            );
            return Err(e.into());
        }

        self.verify_dependencies(&mut project).await;
        let missing = project.unsatisfied_dependencies();
        if !missing.is_empty() {
            return Err(self.abort_unsatisfied(&project, missing));
        }

        if let Some(port) = project.port {
            if let Some(conflict) = ports::check_port(port) {
                self.persist_log(&id, LogLevel::Warn, conflict.to_string());
                return Err(OrchestratorError::PortInUse(conflict));
            }
        }

        if project.project_type.is_native() {
            // Live logs show the current run only; the store keeps history.
            self.native.buffer().clear(&id);
        }
        let run = Arc::new(RunHandle::default());
        let hooks = RunnerHooks {
            log_sink: Some(self.log_sink(&id)),
            on_exit: Some(self.exit_hook(&id, Arc::clone(&run))),
        };
        let pid = match runner.start(&project, hooks).await {
            Ok(pid) => pid,
            Err(RunnerError::AlreadyRunning(id)) => {
                return Err(OrchestratorError::AlreadyRunning(id))
            }
            Err(e) => {
                let message = e.to_string();
                self.persist_log(&id, LogLevel::Error, format!("failed to start: {message}"));
                project.set_error(message);
                if let Err(save_err) = self.store.save(&project) {
                    warn!(project = %id, error = %save_err, "failed to persist start failure");
                }
                return Err(e.into());
            }
        };
        run.pid.store(pid, Ordering::SeqCst);

        let _guard = self.persist.lock().unwrap_or_else(|e| e.into_inner());
        if run.exited.load(Ordering::SeqCst) {
            info!(project = %id, pid, "process exited before it was marked running");
            return Ok(());
        }
        project.pid = pid;
        project.clear_error();
        if !project.domain.is_empty() {
            if let Err(e) = self.proxy.add_project(&project) {
                warn!(project = %id, error = %e, "failed to register route");
                self.persist_log(&id, LogLevel::Warn, format!("proxy route not registered: {e}"));
            }
        }
        project.update_status(Status::Running);
        self.store.save(&project)?;
        info!(project = %id, pid, port = ?project.port, "project started");
        Ok(())
    }

    fn abort_unsatisfied(
        &self,
        project: &Project,
        missing: Vec<crate::domain::Dependency>,
    ) -> OrchestratorError {
        let err = OrchestratorError::UnsatisfiedDependencies {
            project: project.id.clone(),
            missing,
        };
        self.persist_log(&project.id, LogLevel::Error, err.to_string());
        // Keep the probed versions; status is untouched.
        if let Err(e) = self.store.save(project) {
            warn!(project = %project.id, error = %e, "failed to persist dependency check");
        }
        err
    }

    pub async fn stop(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let project = self.store.get(project_id)?;
        let id = project.id.clone();
        let runner = self.runner_for(project.project_type);

        if runner.is_running(&id).await {
            if let Err(e) = runner.stop(&id).await {
                warn!(project = %id, error = %e, "stop failed, cleaning up anyway");
                self.persist_log(&id, LogLevel::Warn, format!("stop failed: {e}"));
            }
        } else if project.pid > 0 {
            info!(project = %id, pid = project.pid, "not tracked, killing stored pid");
            if let Err(e) = platform::kill_pid(project.pid) {
                warn!(project = %id, pid = project.pid, error = %e, "failed to kill stored pid");
                self.persist_log(&id, LogLevel::Warn, format!("failed to kill pid {}: {e:#}", project.pid));
            }
        } else {
            // A run that exited on its own still holds its managed
            // dependencies. Release them, but leave the record alone.
            let mut project = project;
            if let Err(e) = self.resolve_manifest(&mut project) {
                debug!(project = %id, error = %e, "manifest unavailable, releasing recorded dependencies");
            }
            let in_use = self.dependencies_in_use(&id).await;
            self.deps
                .release(&project, &in_use, Some(self.log_sink(&id)))
                .await;
            return Err(OrchestratorError::NotRunning(id));
        }

        // The exit hook may have written in the meantime.
        let mut project = match self.store.get(&id) {
            Ok(fresh) => fresh,
            Err(_) => project,
        };

        if let Err(e) = self.proxy.remove_project(&id) {
            warn!(project = %id, error = %e, "failed to remove route");
        }
        let in_use = self.dependencies_in_use(&id).await;
        self.deps
            .release(&project, &in_use, Some(self.log_sink(&id)))
            .await;

        project.pid = 0;
        project.update_status(Status::Stopped);
        self.store.save(&project)?;
        info!(project = %id, "project stopped");
        Ok(())
    }

    pub async fn restart(&self, project_id: &str) -> Result<(), OrchestratorError> {
        match self.stop(project_id).await {
            Ok(()) | Err(OrchestratorError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(project_id).await
    }

    /// Recent log entries: the live buffer while the project runs, the
    /// durable store otherwise.
    pub async fn get_logs(
        &self,
        project_id: &str,
        tail: Option<usize>,
    ) -> Result<Vec<LogEntry>, OrchestratorError> {
        let project = self.store.get(project_id)?;
        let runner = self.runner_for(project.project_type);
        if runner.is_running(&project.id).await {
            return Ok(runner.logs(&project.id, tail).await);
        }
        Ok(self.store.logs(&project.id, tail)?)
    }

    pub async fn get_status(&self, project_id: &str) -> Result<RunnerStatus, OrchestratorError> {
        let project = self.store.get(project_id)?;
        let runner = self.runner_for(project.project_type);
        if runner.is_running(&project.id).await {
            return Ok(runner.status(&project.id).await);
        }
        Ok(RunnerStatus {
            project_id: project.id.clone(),
            status: project.status,
            pid: project.pid,
            port: project.port,
            uptime: None,
            message: project.last_error.clone().unwrap_or_default(),
        })
    }

    /// Upsert configured projects. Existing records keep their runtime
    /// fields. Returns the ids in declaration order.
    pub fn register_projects(
        &self,
        configs: &[ProjectConfig],
        global_scripts: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut ids = Vec::with_capacity(configs.len());
        for config in configs {
            let mut project = config.to_project(global_scripts);
            match self.store.get(&project.id) {
                Ok(existing) => {
                    project.status = existing.status;
                    project.pid = existing.pid;
                    project.created_at = existing.created_at;
                    project.last_error = existing.last_error;
                }
                Err(StoreError::NotFound(_)) => {
                    debug!(project = %project.id, "registering new project");
                }
                Err(e) => return Err(e.into()),
            }
            self.store.save(&project)?;
            ids.push(project.id);
        }
        Ok(ids)
    }

    pub async fn summary(&self) -> Result<Summary, OrchestratorError> {
        let mut summary = Summary::default();
        for project in self.store.list()? {
            match project.status {
                Status::Running | Status::Starting => summary.running += 1,
                Status::Error => summary.error += 1,
                _ => summary.stopped += 1,
            }
        }
        summary.proxy_running = self.proxy.is_running().await;
        Ok(summary)
    }

    /// Stop every tracked project, cancel health checks and stop the proxy.
    pub async fn shutdown(&self) {
        for id in self.native.running_projects().await {
            match self.stop(&id).await {
                Ok(()) | Err(OrchestratorError::NotRunning(_)) => {}
                Err(e) => warn!(project = %id, error = %e, "failed to stop during shutdown"),
            }
        }
        self.native.stop_all().await;
        self.deps.shutdown().await;
        if let Err(e) = self.proxy.stop().await {
            warn!(error = %e, "failed to stop reverse proxy");
        }
        info!("shutdown complete");
    }
}
