use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{Dependency, Project, ProjectType};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevhostConfig {
    /// Where devhost keeps its store, proxy files and downloaded binaries.
    #[serde(default)]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub managed_dependencies: BTreeMap<String, ManagedDependencyConfig>,
    #[serde(default)]
    pub global_scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_proxy_version() -> String {
    "v3.0.0".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    #[serde(default = "default_proxy_version")]
    pub version: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: default_http_port(),
            https_port: default_https_port(),
            version: default_proxy_version(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ManagedDependencyConfig {
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub post_start_command: Option<String>,
    /// Overrides the built-in reachability probe for this dependency.
    #[serde(default)]
    pub probe_command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub init_databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthCheckConfig {
    pub command: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    #[serde(
        default = "default_health_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

/// Accept humantime strings (`"10s"`, `"1m 30s"`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let duration = humantime::parse_duration(&raw).map_err(de::Error::custom)?;
    if duration.is_zero() {
        return Err(de::Error::custom("duration must be greater than zero"));
    }
    Ok(duration)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub domain: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub auto_start: bool,
}

impl ProjectConfig {
    /// Build a fresh project record from this declaration. Scripts not given
    /// by the project fall back to the global script map.
    pub fn to_project(&self, global_scripts: &BTreeMap<String, String>) -> Project {
        let path = PathBuf::from(crate::platform::expand_home(&self.path));
        let mut project = Project::new(&self.name, path, &self.domain, self.project_type);
        project.port = self.port;
        project.env = self.env.clone();
        project.scripts = global_scripts.clone();
        project
            .scripts
            .extend(self.scripts.iter().map(|(k, v)| (k.clone(), v.clone())));
        project.dependencies = self
            .dependencies
            .iter()
            .map(|d| Dependency::new(&d.name, &d.version, d.managed))
            .collect();
        project
    }
}
