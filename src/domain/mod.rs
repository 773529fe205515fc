pub mod log;
pub mod manifest;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use log::{detect_log_level, LogEntry, LogLevel};
pub use manifest::{parse_manifest, Manifest, ManifestError, MANIFEST_FILE};

// ---------------------------------------------------------------------------
// ProjectType: selects which runner strategy applies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Python,
    Go,
    Java,
    Ruby,
    Docker,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Go => "go",
            ProjectType::Java => "java",
            ProjectType::Ruby => "ruby",
            ProjectType::Docker => "docker",
        }
    }

    /// Whether projects of this type run as plain OS processes.
    pub fn is_native(&self) -> bool {
        !matches!(self, ProjectType::Docker)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ProjectType::Node),
            "python" => Ok(ProjectType::Python),
            "go" => Ok(ProjectType::Go),
            "java" => Ok(ProjectType::Java),
            "ruby" => Ok(ProjectType::Ruby),
            "docker" => Ok(ProjectType::Docker),
            other => Err(format!("unsupported project type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Error,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Error => "error",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// One tool or service a project needs. `satisfied` is only meaningful right
/// after a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub required_version: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, required_version: impl Into<String>, managed: bool) -> Self {
        Self {
            name: name.into(),
            version: None,
            required_version: required_version.into(),
            managed,
            satisfied: false,
            message: None,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.required_version.is_empty() {
            write!(f, " {}", self.required_version)?;
        }
        if let Some(msg) = &self.message {
            write!(f, " ({msg})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub domain: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub status: Status,
    #[serde(default)]
    pub port: Option<u16>,
    /// OS process id, 0 when not running.
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Parsed lazily from the project directory; never persisted.
    #[serde(skip)]
    pub manifest: Option<Manifest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        domain: impl Into<String>,
        project_type: ProjectType,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: slugify(&name),
            name,
            path: path.into(),
            domain: domain.into(),
            project_type,
            status: Status::Stopped,
            port: None,
            pid: 0,
            dependencies: Vec::new(),
            scripts: BTreeMap::new(),
            env: BTreeMap::new(),
            manifest: None,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == Status::Running
    }

    pub fn update_status(&mut self, status: Status) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = Status::Error;
        self.last_error = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    pub fn unsatisfied_dependencies(&self) -> Vec<Dependency> {
        self.dependencies
            .iter()
            .filter(|d| !d.satisfied)
            .cloned()
            .collect()
    }

    pub fn managed_dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.managed)
            .map(|d| d.name.as_str())
    }

    /// Resolve the script that runs the project in development mode: the
    /// manifest's `dev` script first, then the project's own script map.
    pub fn dev_script(&self) -> Option<&str> {
        self.manifest
            .as_ref()
            .and_then(|m| m.dev_script())
            .or_else(|| self.scripts.get("dev").map(String::as_str))
            .filter(|s| !s.trim().is_empty())
    }

    /// Fold a freshly parsed manifest into this project. Fields already set
    /// on the project (from configuration) take precedence.
    pub fn apply_manifest(&mut self, manifest: Manifest) {
        if self.domain.is_empty() {
            self.domain = manifest.domain.clone();
        }
        if self.port.is_none() {
            self.port = manifest.port();
        }
        for (key, value) in &manifest.env {
            self.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for dep in &manifest.dependencies {
            if !self.dependencies.iter().any(|d| d.name == dep.name) {
                self.dependencies
                    .push(Dependency::new(&dep.name, &dep.version, dep.managed));
            }
        }
        self.manifest = Some(manifest);
    }
}

/// Turn a project name into a stable identifier: lowercase ASCII
/// alphanumerics separated by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("My Web App"), "my-web-app");
        assert_eq!(slugify("api__v2--beta"), "api-v2-beta");
        assert_eq!(slugify("  trailing  "), "trailing");
    }

    #[test]
    fn project_type_round_trips_through_str() {
        for ty in [
            ProjectType::Node,
            ProjectType::Python,
            ProjectType::Go,
            ProjectType::Java,
            ProjectType::Ruby,
            ProjectType::Docker,
        ] {
            assert_eq!(ty.as_str().parse::<ProjectType>().unwrap(), ty);
        }
        assert!("cobol".parse::<ProjectType>().is_err());
        assert!(!ProjectType::Docker.is_native());
        assert!(ProjectType::Node.is_native());
    }

    #[test]
    fn set_error_records_message() {
        let mut p = Project::new("web", "/tmp/web", "web.test", ProjectType::Node);
        p.set_error("boom");
        assert_eq!(p.status, Status::Error);
        assert_eq!(p.last_error.as_deref(), Some("boom"));
        p.clear_error();
        assert!(p.last_error.is_none());
    }

    #[test]
    fn dev_script_prefers_manifest() {
        let mut p = Project::new("web", "/tmp/web", "", ProjectType::Node);
        p.scripts.insert("dev".into(), "npm start".into());
        assert_eq!(p.dev_script(), Some("npm start"));

        let mut manifest = Manifest::default();
        manifest.scripts.insert("dev".into(), "npm run dev".into());
        p.apply_manifest(manifest);
        assert_eq!(p.dev_script(), Some("npm run dev"));
    }

    #[test]
    fn apply_manifest_keeps_configured_fields() {
        let mut p = Project::new("web", "/tmp/web", "configured.test", ProjectType::Node);
        p.port = Some(4000);
        p.env.insert("MODE".into(), "config".into());
        p.dependencies.push(Dependency::new("node", ">=18", false));

        let mut manifest = Manifest {
            domain: "manifest.test".into(),
            ..Manifest::default()
        };
        manifest.env.insert("MODE".into(), "manifest".into());
        manifest.env.insert("PORT".into(), "5000".into());
        manifest.dependencies.push(manifest::ManifestDependency {
            name: "postgres".into(),
            version: "16".into(),
            managed: true,
        });
        manifest.dependencies.push(manifest::ManifestDependency {
            name: "node".into(),
            version: ">=20".into(),
            managed: false,
        });

        p.apply_manifest(manifest);
        assert_eq!(p.domain, "configured.test");
        assert_eq!(p.port, Some(4000));
        assert_eq!(p.env["MODE"], "config");
        assert_eq!(p.env["PORT"], "5000");
        assert_eq!(p.dependencies.len(), 2);
        assert_eq!(p.dependencies[0].required_version, ">=18");
        assert_eq!(p.managed_dependency_names().collect::<Vec<_>>(), vec!["postgres"]);
    }

    #[test]
    fn unsatisfied_dependencies_filters() {
        let mut p = Project::new("web", "/tmp/web", "", ProjectType::Node);
        let mut ok = Dependency::new("node", "", false);
        ok.satisfied = true;
        p.dependencies.push(ok);
        p.dependencies.push(Dependency::new("python", "", false));
        let missing = p.unsatisfied_dependencies();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "python");
    }

    #[test]
    fn manifest_is_not_persisted() {
        let mut p = Project::new("web", "/tmp/web", "", ProjectType::Node);
        p.manifest = Some(Manifest::default());
        let json = serde_json::to_string(&p).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert!(back.manifest.is_none());
        assert_eq!(back.id, "web");
        assert!(json.contains("\"type\":\"node\""));
    }
}
