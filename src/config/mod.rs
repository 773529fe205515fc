pub mod model;
pub mod resolve;

use std::path::Path;

use model::DevhostConfig;

pub fn load_config(path: &Path) -> anyhow::Result<DevhostConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: DevhostConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}

/// Load the config at `path`, or the built-in defaults when there is none.
pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<DevhostConfig> {
    match path {
        Some(path) => load_config(path),
        None => {
            tracing::info!("no config file found, using defaults");
            Ok(DevhostConfig::default())
        }
    }
}
