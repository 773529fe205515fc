//! Reverse proxy: a routing table of running projects, rendered to a Traefik
//! dynamic-configuration file, plus the lifecycle of the Traefik process.

pub mod install;
pub mod routes;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::model::ProxyConfig;
use crate::domain::Project;

const PROXY_DIRNAME: &str = "proxy";
const ROUTES_FILE: &str = "routes.toml";
const LOG_FILE: &str = "proxy.log";
const BIN_DIRNAME: &str = "bin";
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("project '{0}' has no domain")]
    NoDomain(String),

    #[error("project '{0}' has no port to route to")]
    NoPort(String),

    #[error("reverse proxy is already running")]
    AlreadyRunning,

    #[error("no reverse proxy release for platform {0}")]
    UnsupportedPlatform(String),

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("invalid release archive: {0}")]
    Archive(String),

    #[error("{0} not found in release archive")]
    BinaryNotInArchive(&'static str),

    #[error("failed to render routing config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch reverse proxy: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Backend target for one running project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub domain: String,
    pub port: u16,
}

/// Owns the routing table (keyed by project id) and the proxy child process.
///
/// Every add/remove rewrites the routing file from the whole table while the
/// table lock is held, so the file always matches some state of the table.
pub struct ProxyConfigurator {
    config: ProxyConfig,
    dir: PathBuf,
    binary: PathBuf,
    routes: RwLock<BTreeMap<String, Route>>,
    child: Mutex<Option<Child>>,
}

impl ProxyConfigurator {
    pub fn new(config: ProxyConfig, state_dir: &Path) -> Self {
        Self {
            config,
            dir: state_dir.join(PROXY_DIRNAME),
            binary: state_dir.join(BIN_DIRNAME).join(install::BINARY_NAME),
            routes: RwLock::new(BTreeMap::new()),
            child: Mutex::new(None),
        }
    }

    pub fn routes_path(&self) -> PathBuf {
        self.dir.join(ROUTES_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    pub fn http_port(&self) -> u16 {
        self.config.http_port
    }

    /// Register a running project. Projects without a domain are rejected.
    pub fn add_project(&self, project: &Project) -> Result<(), ProxyError> {
        if project.domain.trim().is_empty() {
            return Err(ProxyError::NoDomain(project.id.clone()));
        }
        let port = project
            .port
            .ok_or_else(|| ProxyError::NoPort(project.id.clone()))?;

        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(
            project.id.clone(),
            Route {
                name: project.name.clone(),
                domain: project.domain.clone(),
                port,
            },
        );
        self.write_config(&routes)?;
        info!(project = %project.id, domain = %project.domain, port, "route added");
        Ok(())
    }

    /// Drop a project's route. Removing an unknown id still rewrites the file.
    pub fn remove_project(&self, project_id: &str) -> Result<(), ProxyError> {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let removed = routes.remove(project_id).is_some();
        self.write_config(&routes)?;
        if removed {
            info!(project = %project_id, "route removed");
        }
        Ok(())
    }

    pub fn routes(&self) -> BTreeMap<String, Route> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_route(&self, project_id: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(project_id)
    }

    /// Write the routing file for the current table.
    pub fn write_current(&self) -> Result<(), ProxyError> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        self.write_config(&routes)
    }

    fn write_config(&self, routes: &BTreeMap<String, Route>) -> Result<(), ProxyError> {
        let rendered = routes::render(routes)?;
        let path = self.routes_path();
        let io_err = |source| ProxyError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        // Traefik watches the file; a rename never exposes a half-written one.
        let tmp = self.dir.join(format!("{ROUTES_FILE}.tmp"));
        std::fs::write(&tmp, rendered).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        debug!(path = %path.display(), routes = routes.len(), "routing config written");
        Ok(())
    }

    /// Install the proxy binary if absent, write the routing file and launch
    /// the proxy on the configured HTTP port.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let mut child = self.child.lock().await;
        if let Some(existing) = child.as_mut() {
            if matches!(existing.try_wait(), Ok(None)) {
                return Err(ProxyError::AlreadyRunning);
            }
        }

        if !self.binary.is_file() {
            info!(version = %self.config.version, "reverse proxy binary not found, installing");
            install::install(&self.config.version, &self.binary).await?;
        }
        self.write_current()?;

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg(format!(
            "--providers.file.filename={}",
            self.routes_path().display()
        ))
        .arg("--providers.file.watch=true")
        .arg(format!(
            "--entrypoints.web.address=:{}",
            self.config.http_port
        ))
        .arg("--log.level=INFO")
        .arg(format!("--log.filepath={}", self.log_path().display()))
        .arg("--accesslog=false")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

        let spawned = cmd.spawn().map_err(ProxyError::Spawn)?;
        info!(
            pid = ?spawned.id(),
            http_port = self.config.http_port,
            config = %self.routes_path().display(),
            "reverse proxy started",
        );
        *child = Some(spawned);
        Ok(())
    }

    /// Live check: can we connect to the proxy's HTTP port?
    pub async fn is_running(&self) -> bool {
        let addr = format!("127.0.0.1:{}", self.config.http_port);
        matches!(
            tokio::time::timeout(LIVENESS_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// Kill the proxy process if we launched one.
    pub async fn stop(&self) -> Result<(), ProxyError> {
        let mut child = self.child.lock().await;
        let Some(mut proc) = child.take() else {
            return Ok(());
        };
        if let Err(e) = proc.kill().await {
            warn!(error = %e, "failed to kill reverse proxy");
            return Err(ProxyError::Spawn(e));
        }
        info!("reverse proxy stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProjectType;
    use tempfile::TempDir;

    fn configurator(dir: &TempDir, http_port: u16) -> ProxyConfigurator {
        let config = ProxyConfig {
            http_port,
            ..ProxyConfig::default()
        };
        ProxyConfigurator::new(config, dir.path())
    }

    fn project(name: &str, domain: &str, port: Option<u16>) -> Project {
        let mut p = Project::new(name, "/tmp", domain, ProjectType::Node);
        p.port = port;
        p
    }

    #[test]
    fn add_then_remove_restores_file() {
        let dir = TempDir::new().unwrap();
        let proxy = configurator(&dir, 8080);
        proxy
            .add_project(&project("shop", "shop.test", Some(3000)))
            .unwrap();
        let before = std::fs::read(proxy.routes_path()).unwrap();

        proxy
            .add_project(&project("blog", "blog.test", Some(4000)))
            .unwrap();
        assert!(proxy.has_route("blog"));
        proxy.remove_project("blog").unwrap();

        assert_eq!(std::fs::read(proxy.routes_path()).unwrap(), before);
        assert!(!dir.path().join("proxy/routes.toml.tmp").exists());
    }

    #[test]
    fn project_without_domain_is_rejected() {
        let dir = TempDir::new().unwrap();
        let proxy = configurator(&dir, 8080);
        assert!(matches!(
            proxy.add_project(&project("api", "", Some(3000))),
            Err(ProxyError::NoDomain(_))
        ));
        assert!(matches!(
            proxy.add_project(&project("api", "api.test", None)),
            Err(ProxyError::NoPort(_))
        ));
        assert!(proxy.routes().is_empty());
    }

    #[test]
    fn re_adding_updates_port() {
        let dir = TempDir::new().unwrap();
        let proxy = configurator(&dir, 8080);
        proxy
            .add_project(&project("api", "api.test", Some(3000)))
            .unwrap();
        proxy
            .add_project(&project("api", "api.test", Some(3001)))
            .unwrap();
        assert_eq!(proxy.routes()["api"].port, 3001);
        let content = std::fs::read_to_string(proxy.routes_path()).unwrap();
        assert!(content.contains("http://localhost:3001"));
        assert!(!content.contains("http://localhost:3000"));
    }

    #[tokio::test]
    async fn liveness_follows_the_port() {
        let dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let proxy = configurator(&dir, port);
        assert!(proxy.is_running().await);
        drop(listener);
        assert!(!proxy.is_running().await);
    }

    #[tokio::test]
    async fn stop_without_start_is_ok() {
        let dir = TempDir::new().unwrap();
        let proxy = configurator(&dir, 8080);
        proxy.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_uses_cached_binary() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let proxy = configurator(&dir, 8080);
        let bin = proxy.binary_path().to_path_buf();
        std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
        std::fs::write(&bin, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        proxy.start().await.unwrap();
        assert!(proxy.routes_path().exists());
        assert!(matches!(proxy.start().await, Err(ProxyError::AlreadyRunning)));
        proxy.stop().await.unwrap();
    }
}
