use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tracing::debug;

use super::command::run_shell;
use crate::domain::Dependency;

/// Verifies that a project's tools are present and fills in
/// `version`/`satisfied`/`message`. Version constraints are not evaluated.
#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self, deps: &mut [Dependency]);
}

/// Runs a `--version` style probe per dependency name.
#[derive(Debug, Clone, Default)]
pub struct CommandChecker {
    overrides: HashMap<String, String>,
}

impl CommandChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `command` as the presence probe for `name`.
    pub fn with_probe(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), command.into());
        self
    }

    fn probe_for(&self, name: &str) -> String {
        if let Some(cmd) = self.overrides.get(name) {
            return cmd.clone();
        }
        match name {
            "node" => "node --version".to_string(),
            "python" => "python3 --version".to_string(),
            "go" => "go version".to_string(),
            "java" => "java -version".to_string(),
            "ruby" => "ruby --version".to_string(),
            "docker" => "docker --version".to_string(),
            "postgres" => "psql --version".to_string(),
            "redis" => "redis-cli --version".to_string(),
            "mongodb" => "mongosh --version".to_string(),
            other => format!("{other} --version"),
        }
    }
}

#[async_trait]
impl DependencyChecker for CommandChecker {
    async fn check(&self, deps: &mut [Dependency]) {
        let env = BTreeMap::new();
        for dep in deps.iter_mut() {
            let probe = self.probe_for(&dep.name);
            match run_shell(&probe, &env, true).await {
                Ok(out) if out.success => {
                    dep.version = out.output.lines().next().map(|l| l.trim().to_string());
                    dep.satisfied = true;
                    dep.message = None;
                }
                Ok(out) => {
                    dep.version = None;
                    dep.satisfied = false;
                    dep.message = Some(format!("not found ({})", out.describe()));
                }
                Err(e) => {
                    dep.version = None;
                    dep.satisfied = false;
                    dep.message = Some(format!("probe failed: {e}"));
                }
            }
            debug!(dependency = %dep.name, satisfied = dep.satisfied, "dependency checked");
        }
    }
}
