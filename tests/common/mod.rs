#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use devhost::config::model::DevhostConfig;
use devhost::deps::{CommandChecker, ManagedDependencySupervisor};
use devhost::domain::{Project, ProjectType};
use devhost::orchestrator::Orchestrator;
use devhost::proxy::ProxyConfigurator;
use devhost::runner::{LogBuffer, NativeRunner};
use devhost::store::{MemoryStore, ProjectRepository};
use tempfile::TempDir;

/// A scratch state directory plus a config file written into it.
pub struct TestEnv {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestEnv {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let state_dir = dir.path().join("state");
        let full = format!("state_dir = {:?}\n{}", state_dir.display().to_string(), config_toml);
        std::fs::write(&config_path, full).unwrap();
        Self { dir, config_path }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn parse_config(config_toml: &str) -> DevhostConfig {
    toml::from_str(config_toml).unwrap()
}

/// Orchestrator over an in-memory store seeded with `projects`.
pub fn orchestrator(config: &DevhostConfig, state_dir: &Path, projects: Vec<Project>) -> Orchestrator {
    orchestrator_with_store(config, state_dir, Arc::new(MemoryStore::with_projects(projects)))
}

pub fn orchestrator_with_store(
    config: &DevhostConfig,
    state_dir: &Path,
    store: Arc<dyn ProjectRepository>,
) -> Orchestrator {
    Orchestrator::new(
        store,
        Arc::new(CommandChecker::new()),
        NativeRunner::new(Arc::new(LogBuffer::default())).with_grace(Duration::from_secs(2)),
        ManagedDependencySupervisor::new(config.managed_dependencies.clone()),
        ProxyConfigurator::new(config.proxy.clone(), state_dir),
    )
}

/// A native project that runs `script` as its dev script.
pub fn native_project(name: &str, dir: &Path, script: &str) -> Project {
    let mut project = Project::new(name, dir, "", ProjectType::Node);
    project.scripts.insert("dev".to_string(), script.to_string());
    project
}

pub fn count_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
