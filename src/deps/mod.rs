//! Managed dependencies: shared auxiliary services (databases, caches, local
//! cloud emulators) that devhost installs, starts, health-checks and stops on
//! behalf of the projects that declare them.

pub mod checker;
pub mod command;
mod status;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::model::{DatabaseConfig, HealthCheckConfig, ManagedDependencyConfig};
use crate::domain::{LogLevel, Project};
use crate::runner::LogSink;

pub use checker::{CommandChecker, DependencyChecker};
use command::run_shell;

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("managed dependency '{0}' is not configured")]
    NotConfigured(String),

    #[error("managed dependency '{0}' is already running")]
    AlreadyRunning(String),

    #[error("managed dependency '{0}' is not running")]
    NotRunning(String),

    #[error("managed dependency '{name}' has no {action} command")]
    MissingCommand { name: String, action: &'static str },

    #[error("{action} of '{name}' failed ({output})")]
    CommandFailed {
        name: String,
        action: &'static str,
        output: String,
    },

    #[error("failed to run {action} command for '{name}': {source}")]
    Io {
        name: String,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid database identifier '{0}'")]
    InvalidDatabaseName(String),
}

/// Running flag and live status of one managed dependency, as reported by
/// [`ManagedDependencySupervisor::statuses`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub running: bool,
}

struct HealthTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ServiceState {
    running: bool,
    health: Option<HealthTask>,
    /// Failed probes over the supervisor's lifetime. Owned by the dependency,
    /// not by whichever project started it.
    health_failures: Arc<AtomicU64>,
}

type Slot = Arc<Mutex<ServiceState>>;

/// Process-wide supervisor for managed dependencies. One instance of each
/// dependency is shared by every project that declares it.
///
/// Each dependency has its own async lock, held for the whole of a start,
/// release or status refresh of that dependency. The map of locks sits
/// behind a plain mutex that is never held across an await, so a slow
/// install of one dependency does not block work on the others.
pub struct ManagedDependencySupervisor {
    configs: BTreeMap<String, ManagedDependencyConfig>,
    slots: std::sync::Mutex<BTreeMap<String, Slot>>,
}

impl ManagedDependencySupervisor {
    pub fn new(configs: BTreeMap<String, ManagedDependencyConfig>) -> Self {
        Self {
            configs,
            slots: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_configured(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn existing_slot(&self, name: &str) -> Option<Slot> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    pub async fn is_running(&self, name: &str) -> bool {
        match self.existing_slot(name) {
            Some(slot) => slot.lock().await.running,
            None => false,
        }
    }

    /// Whether a health-check timer is currently armed for `name`.
    pub async fn health_check_active(&self, name: &str) -> bool {
        match self.existing_slot(name) {
            Some(slot) => slot.lock().await.health.is_some(),
            None => false,
        }
    }

    /// Number of failed health probes recorded for `name`.
    pub async fn health_failures(&self, name: &str) -> u64 {
        match self.existing_slot(name) {
            Some(slot) => slot.lock().await.health_failures.load(Ordering::SeqCst),
            None => 0,
        }
    }

    /// Provision and start every managed dependency `project` declares.
    /// Already-running dependencies are skipped; unconfigured ones are skipped
    /// with a warning. The first failure aborts.
    pub async fn ensure_started(
        &self,
        project: &Project,
        sink: Option<LogSink>,
    ) -> Result<(), DependencyError> {
        for dep in project.dependencies.iter().filter(|d| d.managed) {
            let name = dep.name.as_str();
            let Some(config) = self.configs.get(name) else {
                warn!(dependency = name, project = %project.id, "no managed_dependencies entry, skipping");
                emit(
                    &sink,
                    LogLevel::Warn,
                    name,
                    "not found in managed_dependencies, skipping",
                );
                continue;
            };

            let slot = self.slot(name);
            let mut entry = slot.lock().await;
            if entry.running {
                debug!(dependency = name, "already running");
                emit(&sink, LogLevel::Info, name, "already running, skipping");
                continue;
            }

            let result = async {
                self.install_if_missing(name, config, &sink).await?;
                if name == "postgres" && !config.init_databases.is_empty() {
                    self.init_databases(name, config, &sink).await?;
                }
                self.start_service_command(name, config, &sink).await
            }
            .await;
            if let Err(e) = result {
                emit(&sink, LogLevel::Error, name, &e.to_string());
                return Err(e);
            }

            entry.running = true;
            replace_health_task(&mut entry, name, config.health_check.as_ref());
        }
        Ok(())
    }

    /// Release the managed dependencies `project` declared, except those in
    /// `still_in_use`. Health timers are cancelled even when the running flag
    /// is already clear. Stop commands are best effort; the running flag is
    /// cleared whatever their outcome.
    pub async fn release(
        &self,
        project: &Project,
        still_in_use: &HashSet<String>,
        sink: Option<LogSink>,
    ) {
        for dep in project.dependencies.iter().filter(|d| d.managed) {
            let name = dep.name.as_str();
            let Some(slot) = self.existing_slot(name) else {
                continue;
            };
            let mut entry = slot.lock().await;
            if still_in_use.contains(name) {
                if entry.running {
                    info!(dependency = name, "still in use by another project, keeping it up");
                }
                continue;
            }

            stop_health_task(&mut entry, name).await;
            if !entry.running {
                continue;
            }
            if let Some(config) = self.configs.get(name) {
                if let Err(e) = self.stop_service_command(name, config).await {
                    warn!(dependency = name, error = %e, "failed to stop managed dependency");
                    emit(&sink, LogLevel::Warn, name, &e.to_string());
                }
            }
            entry.running = false;
        }
    }

    /// Start one configured dependency outside any project lifecycle.
    pub async fn start_service(&self, name: &str) -> Result<(), DependencyError> {
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| DependencyError::NotConfigured(name.to_string()))?;
        let slot = self.slot(name);
        let mut entry = slot.lock().await;
        if entry.running {
            return Err(DependencyError::AlreadyRunning(name.to_string()));
        }

        self.start_service_command(name, config, &None).await?;
        entry.running = true;
        replace_health_task(&mut entry, name, config.health_check.as_ref());
        Ok(())
    }

    /// Stop one configured dependency outside any project lifecycle.
    pub async fn stop_service(&self, name: &str) -> Result<(), DependencyError> {
        let Some(slot) = self.existing_slot(name) else {
            return Err(DependencyError::NotRunning(name.to_string()));
        };
        let mut entry = slot.lock().await;
        stop_health_task(&mut entry, name).await;
        if !entry.running {
            return Err(DependencyError::NotRunning(name.to_string()));
        }
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| DependencyError::NotConfigured(name.to_string()))?;

        self.stop_service_command(name, config).await?;
        entry.running = false;
        Ok(())
    }

    /// Live status of every configured dependency. Well-known services are
    /// asked of the host's service manager; the rest report the in-memory flag.
    /// A dependency found down loses its health timer along with the flag.
    pub async fn statuses(&self) -> Vec<ServiceInfo> {
        let mut infos = Vec::with_capacity(self.configs.len());
        for name in self.configs.keys() {
            let probed = status::probe_service(name).await;
            let slot = self.slot(name);
            let mut entry = slot.lock().await;
            let running = probed.unwrap_or(entry.running);
            if running != entry.running {
                debug!(dependency = %name, running, "live probe disagrees with running flag");
                if !running {
                    stop_health_task(&mut entry, name).await;
                }
                entry.running = running;
            }
            infos.push(ServiceInfo {
                name: name.clone(),
                running,
            });
        }
        infos
    }

    /// Cancel every health-check timer. Services themselves are left running.
    pub async fn shutdown(&self) {
        for (name, slot) in self.all_slots() {
            let mut entry = slot.lock().await;
            stop_health_task(&mut entry, &name).await;
        }
    }

    async fn install_if_missing(
        &self,
        name: &str,
        config: &ManagedDependencyConfig,
        sink: &Option<LogSink>,
    ) -> Result<(), DependencyError> {
        if probe_reachable(name, config).await {
            debug!(dependency = name, "probe succeeded, skipping install");
            return Ok(());
        }

        let install = config
            .install_command
            .as_deref()
            .ok_or_else(|| DependencyError::MissingCommand {
                name: name.to_string(),
                action: "install",
            })?;
        info!(dependency = name, command = install, "not found, installing");
        emit(sink, LogLevel::Info, name, &format!("installing: {install}"));

        let out = run_shell(install, &config.environment, false)
            .await
            .map_err(|source| DependencyError::Io {
                name: name.to_string(),
                action: "install",
                source,
            })?;
        if !out.success {
            return Err(DependencyError::CommandFailed {
                name: name.to_string(),
                action: "install",
                output: out.describe(),
            });
        }
        emit(sink, LogLevel::Info, name, "installed");
        Ok(())
    }

    async fn init_databases(
        &self,
        name: &str,
        config: &ManagedDependencyConfig,
        sink: &Option<LogSink>,
    ) -> Result<(), DependencyError> {
        for db in &config.init_databases {
            let sql = create_database_sql(db)?;
            info!(dependency = name, database = %db.name, "creating database");
            let command = format!("psql -U postgres -c \"{sql}\"");
            let out = run_shell(&command, &config.environment, false)
                .await
                .map_err(|source| DependencyError::Io {
                    name: name.to_string(),
                    action: "create database",
                    source,
                })?;
            if out.success {
                emit(sink, LogLevel::Info, name, &format!("database {} created", db.name));
            } else if already_exists(&out.output) {
                emit(
                    sink,
                    LogLevel::Info,
                    name,
                    &format!("database {} already exists, skipping", db.name),
                );
            } else {
                return Err(DependencyError::CommandFailed {
                    name: name.to_string(),
                    action: "create database",
                    output: out.describe(),
                });
            }
        }
        Ok(())
    }

    async fn start_service_command(
        &self,
        name: &str,
        config: &ManagedDependencyConfig,
        sink: &Option<LogSink>,
    ) -> Result<(), DependencyError> {
        let start = config
            .start_command
            .as_deref()
            .ok_or_else(|| DependencyError::MissingCommand {
                name: name.to_string(),
                action: "start",
            })?;
        info!(dependency = name, command = start, "starting");
        emit(sink, LogLevel::Info, name, &format!("starting: {start}"));

        let out = run_shell(start, &config.environment, false)
            .await
            .map_err(|source| DependencyError::Io {
                name: name.to_string(),
                action: "start",
                source,
            })?;
        if !out.success {
            return Err(DependencyError::CommandFailed {
                name: name.to_string(),
                action: "start",
                output: out.describe(),
            });
        }
        emit(sink, LogLevel::Info, name, "started");

        if let Some(post) = config.post_start_command.clone() {
            spawn_post_start(name.to_string(), post, config.environment.clone(), sink.clone());
        }
        Ok(())
    }

    async fn stop_service_command(
        &self,
        name: &str,
        config: &ManagedDependencyConfig,
    ) -> Result<(), DependencyError> {
        let Some(stop) = config.stop_command.as_deref() else {
            info!(dependency = name, "no stop command, leaving it running");
            return Ok(());
        };
        info!(dependency = name, command = stop, "stopping");
        let out = run_shell(stop, &config.environment, false)
            .await
            .map_err(|source| DependencyError::Io {
                name: name.to_string(),
                action: "stop",
                source,
            })?;
        if !out.success {
            return Err(DependencyError::CommandFailed {
                name: name.to_string(),
                action: "stop",
                output: out.describe(),
            });
        }
        Ok(())
    }
}

fn emit(sink: &Option<LogSink>, level: LogLevel, dependency: &str, message: &str) {
    if let Some(sink) = sink {
        sink(level, format!("[dep:{dependency}] {message}"));
    }
}

/// Built-in reachability probe per well-known dependency.
fn builtin_probe(name: &str) -> Option<&'static str> {
    match name {
        "postgres" => Some("psql --version"),
        "redis" => Some("redis-cli --version"),
        "mongodb" => Some("mongosh --version"),
        "localstack" => Some("localstack --version"),
        _ => None,
    }
}

/// Unknown dependencies with no probe configured count as present.
async fn probe_reachable(name: &str, config: &ManagedDependencyConfig) -> bool {
    let Some(probe) = config.probe_command.as_deref().or_else(|| builtin_probe(name)) else {
        return true;
    };
    match run_shell(probe, &config.environment, true).await {
        Ok(out) => out.success,
        Err(e) => {
            debug!(dependency = name, error = %e, "probe could not run");
            false
        }
    }
}

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex must compile")
});

fn create_database_sql(db: &DatabaseConfig) -> Result<String, DependencyError> {
    if !IDENTIFIER_RE.is_match(&db.name) {
        return Err(DependencyError::InvalidDatabaseName(db.name.clone()));
    }
    match db.owner.as_deref().filter(|o| !o.is_empty()) {
        Some(owner) if !IDENTIFIER_RE.is_match(owner) => {
            Err(DependencyError::InvalidDatabaseName(owner.to_string()))
        }
        Some(owner) => Ok(format!("CREATE DATABASE {} OWNER {};", db.name, owner)),
        None => Ok(format!("CREATE DATABASE {};", db.name)),
    }
}

fn already_exists(output: &str) -> bool {
    output.contains("already exists")
}

fn spawn_post_start(
    name: String,
    command: String,
    env: BTreeMap<String, String>,
    sink: Option<LogSink>,
) {
    // Not awaited: warm-up steps must not delay or fail the start.
    tokio::spawn(async move {
        match run_shell(&command, &env, false).await {
            Ok(out) if out.success => {
                info!(dependency = %name, "post-start command finished");
                emit(&sink, LogLevel::Info, &name, "post-start command finished");
            }
            Ok(out) => {
                warn!(dependency = %name, output = %out.output, "post-start command failed");
                emit(
                    &sink,
                    LogLevel::Warn,
                    &name,
                    &format!("post-start command failed ({})", out.describe()),
                );
            }
            Err(e) => {
                warn!(dependency = %name, error = %e, "post-start command could not run");
                emit(&sink, LogLevel::Warn, &name, &format!("post-start command could not run: {e}"));
            }
        }
    });
}

fn replace_health_task(entry: &mut ServiceState, name: &str, spec: Option<&HealthCheckConfig>) {
    if let Some(old) = entry.health.take() {
        old.cancel.cancel();
    }
    let Some(spec) = spec else {
        return;
    };

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(health_loop(
        name.to_string(),
        spec.clone(),
        cancel.clone(),
        Arc::clone(&entry.health_failures),
    ));
    debug!(dependency = name, interval = ?spec.interval, "health check armed");
    entry.health = Some(HealthTask { cancel, handle });
}

async fn stop_health_task(entry: &mut ServiceState, name: &str) {
    if let Some(task) = entry.health.take() {
        task.cancel.cancel();
        let _ = task.handle.await;
        debug!(dependency = name, "health check cancelled");
    }
}

/// Probe on every tick until cancelled. Failures go to tracing and the
/// dependency's failure counter; no project owns a shared dependency's health.
async fn health_loop(
    name: String,
    spec: HealthCheckConfig,
    cancel: CancellationToken,
    failures: Arc<AtomicU64>,
) {
    let env = BTreeMap::new();
    let mut ticker = tokio::time::interval(spec.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the service was just started.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let probe = tokio::time::timeout(spec.timeout, run_shell(&spec.command, &env, true));
        let failure = tokio::select! {
            _ = cancel.cancelled() => break,
            result = probe => match result {
                Ok(Ok(out)) if out.success => None,
                Ok(Ok(out)) => Some(out.describe()),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", spec.timeout)),
            },
        };

        match failure {
            None => debug!(dependency = %name, "health check passed"),
            Some(reason) => {
                let total = failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(dependency = %name, reason = %reason, failures = total, "health check failed");
            }
        }
    }
}

impl Drop for ManagedDependencySupervisor {
    fn drop(&mut self) {
        let slots = self.slots.get_mut().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            if let Ok(mut entry) = slot.try_lock() {
                if let Some(task) = entry.health.take() {
                    task.cancel.cancel();
                }
            }
        }
    }
}
