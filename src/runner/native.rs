use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{LogBuffer, LogSink, ProjectRunner, RunnerError, RunnerHooks, RunnerStatus, GRACE_PERIOD};
use crate::domain::{LogEntry, LogLevel, Project, Status};
use crate::platform;

/// Capacity of the live log broadcast; slow subscribers lag, never block.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct RunningProcess {
    pid: u32,
    port: Option<u16>,
    started_at: Instant,
    cancel: CancellationToken,
    /// Flips to `true` once the monitor task has fully torn the run down.
    done: watch::Receiver<bool>,
}

/// Runs native projects as process groups through the user's shell.
///
/// Each run owns two reader tasks (stdout, stderr) and one monitor task.
/// The monitor is the only place a record leaves the registry, so a project
/// is tracked exactly while its process is alive.
pub struct NativeRunner {
    processes: Arc<RwLock<HashMap<String, RunningProcess>>>,
    buffer: Arc<LogBuffer>,
    events: broadcast::Sender<LogEntry>,
    grace: Duration,
}

impl Default for NativeRunner {
    fn default() -> Self {
        Self::new(Arc::new(LogBuffer::default()))
    }
}

impl NativeRunner {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            buffer,
            events,
            grace: GRACE_PERIOD,
        }
    }

    /// Override the stop grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn buffer(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Live feed of every captured line, for `up`-style log following.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }

    pub async fn running_projects(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn pid_of(&self, project_id: &str) -> Option<u32> {
        self.processes.read().await.get(project_id).map(|p| p.pid)
    }

    /// Stop every tracked project. Failures are logged; the pass continues.
    pub async fn stop_all(&self) {
        for id in self.running_projects().await {
            if let Err(e) = self.stop(&id).await {
                warn!(project = %id, error = %e, "failed to stop project during shutdown");
            }
        }
    }
}

#[async_trait]
impl ProjectRunner for NativeRunner {
    async fn start(&self, project: &Project, hooks: RunnerHooks) -> Result<u32, RunnerError> {
        // Held across the spawn so two concurrent starts of one id cannot both pass.
        let mut processes = self.processes.write().await;
        if processes.contains_key(&project.id) {
            return Err(RunnerError::AlreadyRunning(project.id.clone()));
        }

        let script = project
            .dev_script()
            .ok_or_else(|| RunnerError::NoDevScript(project.id.clone()))?
            .to_string();
        if !project.path.is_dir() {
            return Err(RunnerError::MissingDirectory(project.path.clone()));
        }

        let mut cmd = platform::shell_command(&script);
        cmd.current_dir(&project.path);
        cmd.envs(&project.env);
        if let Some(port) = project.port {
            if !project.env.contains_key("PORT") {
                cmd.env("PORT", port.to_string());
            }
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        info!(
            project = %project.id,
            dir = %project.path.display(),
            "spawning: {} {:?}",
            platform::shell_name(),
            script,
        );

        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            project: project.id.clone(),
            source,
        })?;

        // kill_on_drop reaps the child if we bail out below.
        let stdout = child.stdout.take().ok_or_else(|| RunnerError::MissingPipe {
            project: project.id.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| RunnerError::MissingPipe {
            project: project.id.clone(),
            stream: "stderr",
        })?;
        let Some(pid) = child.id() else {
            return Err(RunnerError::Spawn {
                project: project.id.clone(),
                source: std::io::Error::other("process exited before its pid could be read"),
            });
        };
        let group_handle = platform::post_spawn_setup(Some(pid));
        debug!(project = %project.id, pid, "child spawned");

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        processes.insert(
            project.id.clone(),
            RunningProcess {
                pid,
                port: project.port,
                started_at: Instant::now(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        drop(processes);

        let stdout_handle = spawn_reader(
            stdout,
            project.id.clone(),
            false,
            Arc::clone(&self.buffer),
            self.events.clone(),
            hooks.log_sink.clone(),
        );
        let stderr_handle = spawn_reader(
            stderr,
            project.id.clone(),
            true,
            Arc::clone(&self.buffer),
            self.events.clone(),
            hooks.log_sink.clone(),
        );

        let processes = Arc::clone(&self.processes);
        let buffer = Arc::clone(&self.buffer);
        let events = self.events.clone();
        let grace = self.grace;
        let project_id = project.id.clone();

        tokio::spawn(async move {
            let mut requested = false;
            let waited = tokio::select! {
                result = child.wait() => result,
                _ = cancel.cancelled() => {
                    requested = true;
                    info!(project = %project_id, pid, "stop requested, terminating process group");
                    let forced = platform::terminate_child(
                        &mut child,
                        Some(pid),
                        group_handle.as_ref(),
                        grace,
                    )
                    .await;
                    if forced {
                        warn!(project = %project_id, pid, "process did not exit within grace period, killed");
                    }
                    child.wait().await
                }
            };

            // Let IO tasks finish draining. A daemonised grandchild can keep a
            // pipe open forever, so the drain is bounded.
            let drain = async {
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;
            };
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, drain).await.is_err() {
                debug!(project = %project_id, pid, "output pipes still open after exit");
            }

            {
                let mut processes = processes.write().await;
                if processes.get(&project_id).is_some_and(|p| p.pid == pid) {
                    processes.remove(&project_id);
                }
            }

            let (status, failure) = classify_exit(requested, waited);
            let summary = match &failure {
                Some(msg) => {
                    error!(project = %project_id, pid, "{}", msg);
                    LogEntry::new(&project_id, LogLevel::Error, msg.clone())
                }
                None => {
                    info!(project = %project_id, pid, "process stopped");
                    LogEntry::new(&project_id, LogLevel::Info, "process stopped")
                }
            };
            publish(&buffer, &events, hooks.log_sink.as_ref(), summary);

            if let Some(on_exit) = hooks.on_exit.as_ref() {
                on_exit(status, failure);
            }
            // The hooks go out of scope with this task.
            drop(hooks);
            let _ = done_tx.send(true);
        });

        Ok(pid)
    }

    async fn stop(&self, project_id: &str) -> Result<(), RunnerError> {
        let (cancel, mut done) = {
            let processes = self.processes.read().await;
            let proc = processes
                .get(project_id)
                .ok_or_else(|| RunnerError::NotRunning(project_id.to_string()))?;
            (proc.cancel.clone(), proc.done.clone())
        };

        cancel.cancel();
        if done.wait_for(|finished| *finished).await.is_err() {
            // Monitor task vanished without reporting; drop the record ourselves.
            warn!(project = %project_id, "monitor task ended unexpectedly");
            self.processes.write().await.remove(project_id);
        }
        Ok(())
    }

    async fn status(&self, project_id: &str) -> RunnerStatus {
        let processes = self.processes.read().await;
        match processes.get(project_id) {
            Some(proc) => {
                let uptime = proc.started_at.elapsed();
                RunnerStatus {
                    project_id: project_id.to_string(),
                    status: Status::Running,
                    pid: proc.pid,
                    port: proc.port,
                    uptime: Some(uptime),
                    message: format!(
                        "running for {}",
                        humantime::format_duration(Duration::from_secs(uptime.as_secs()))
                    ),
                }
            }
            None => RunnerStatus {
                project_id: project_id.to_string(),
                status: Status::Stopped,
                pid: 0,
                port: None,
                uptime: None,
                message: "not running".to_string(),
            },
        }
    }

    async fn logs(&self, project_id: &str, tail: Option<usize>) -> Vec<LogEntry> {
        self.buffer.entries(project_id, tail)
    }

    async fn is_running(&self, project_id: &str) -> bool {
        self.processes.read().await.contains_key(project_id)
    }
}

/// Terminal status and failure message for a finished run. A run ended by a
/// stop request is `Stopped` whatever its exit code.
fn classify_exit(
    requested: bool,
    waited: std::io::Result<std::process::ExitStatus>,
) -> (Status, Option<String>) {
    match waited {
        _ if requested => (Status::Stopped, None),
        Ok(exit) if exit.success() => (Status::Stopped, None),
        Ok(exit) => (Status::Error, Some(format!("process exited with {exit}"))),
        Err(e) => (Status::Error, Some(format!("failed waiting for process: {e}"))),
    }
}

fn publish(
    buffer: &LogBuffer,
    events: &broadcast::Sender<LogEntry>,
    sink: Option<&LogSink>,
    entry: LogEntry,
) {
    if let Some(sink) = sink {
        sink(entry.level, entry.message.clone());
    }
    // No subscribers is fine.
    let _ = events.send(entry.clone());
    buffer.push(entry);
}

fn spawn_reader<R>(
    stream: R,
    project_id: String,
    is_stderr: bool,
    buffer: Arc<LogBuffer>,
    events: broadcast::Sender<LogEntry>,
    sink: Option<LogSink>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let text = line.trim_end_matches(['\n', '\r']).to_string();
                    let entry = LogEntry::from_output(&project_id, text, is_stderr);
                    publish(&buffer, &events, sink.as_ref(), entry);
                }
                Err(e) => {
                    let stream = if is_stderr { "stderr" } else { "stdout" };
                    warn!(project = %project_id, error = %e, "{} read error", stream);
                    break;
                }
            }
        }
    })
}
