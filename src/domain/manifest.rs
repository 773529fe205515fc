use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ProjectType;

pub const MANIFEST_FILE: &str = "devhost.toml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("{} not found in {}; create one in the project directory", MANIFEST_FILE, .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDependency {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub managed: bool,
}

/// The per-project `devhost.toml` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub project_type: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub dependencies: Vec<ManifestDependency>,
}

impl Manifest {
    pub fn validate(&self) -> Result<ProjectType, String> {
        if self.name.trim().is_empty() {
            return Err("'name' field is required".to_string());
        }
        if self.project_type.trim().is_empty() {
            return Err("'type' field is required".to_string());
        }
        self.project_type.parse::<ProjectType>()
    }

    pub fn dev_script(&self) -> Option<&str> {
        self.scripts.get("dev").map(String::as_str)
    }

    /// Port declared by the manifest: `env.PORT` wins over `ports.main`.
    pub fn port(&self) -> Option<u16> {
        self.env
            .get("PORT")
            .and_then(|p| p.trim().parse().ok())
            .or_else(|| self.ports.get("main").copied())
    }
}

/// Read and validate `devhost.toml` from a project directory.
pub fn parse_manifest(project_path: &Path) -> Result<Manifest, ManifestError> {
    let path = project_path.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(ManifestError::NotFound(project_path.to_path_buf()));
    }
    let content = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
        path: path.clone(),
        source,
    })?;
    let manifest: Manifest = toml::from_str(&content).map_err(|e| ManifestError::Invalid {
        path: path.clone(),
        message: e.to_string(),
    })?;
    manifest
        .validate()
        .map_err(|message| ManifestError::Invalid { path, message })?;
    Ok(manifest)
}
