pub mod deps;
pub mod logs;
pub mod ps;
pub mod reconcile;
pub mod stop;
pub mod up;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::model::DevhostConfig;
use crate::config::resolve::{resolve_config, resolve_state_dir};
use crate::config::load_or_default;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::store::JsonStore;

/// Everything a command needs: the loaded config, the state directory and
/// an orchestrator backed by the on-disk store.
pub struct Session {
    pub config: DevhostConfig,
    pub state_dir: PathBuf,
    pub orchestrator: Orchestrator,
}

impl Session {
    pub fn open(config_file: Option<&Path>) -> Result<Self> {
        let config_path = resolve_config(config_file)?;
        let config = load_or_default(config_path.as_deref())?;
        let state_dir = resolve_state_dir(config.state_dir.as_deref());
        let store = JsonStore::open(&state_dir)
            .with_context(|| format!("opening state directory {}", state_dir.display()))?;
        let orchestrator = Orchestrator::from_config(&config, &state_dir, Arc::new(store));
        Ok(Self {
            config,
            state_dir,
            orchestrator,
        })
    }
}

/// Turn a lifecycle error into a user-facing one. Port conflicts get a
/// remediation hint built from the structured payload.
pub fn describe(err: OrchestratorError) -> anyhow::Error {
    match err {
        OrchestratorError::PortInUse(conflict) => anyhow::anyhow!(
            "port {} is already in use by pid {} ({})\n  stop it with `kill {}` or change the project's port",
            conflict.port,
            conflict.pid,
            if conflict.command.is_empty() {
                "unknown command"
            } else {
                conflict.command.as_str()
            },
            conflict.pid
        ),
        other => anyhow::Error::new(other),
    }
}
