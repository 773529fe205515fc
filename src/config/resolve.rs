use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "config.toml";
pub const STATE_DIRNAME: &str = ".devhost";

/// Default state directory: `~/.devhost`.
pub fn default_state_dir() -> PathBuf {
    crate::platform::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(STATE_DIRNAME)
}

/// Resolve the config file path. An explicitly given file must exist; with
/// no explicit file the default `~/.devhost/config.toml` is used when it
/// exists, and `None` means "run on built-in defaults".
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(Some(path.canonicalize()?));
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let default = default_state_dir().join(CONFIG_FILENAME);
    Ok(default.is_file().then_some(default))
}

/// Resolve the state directory: the configured value (with `~` expanded)
/// or the default.
pub fn resolve_state_dir(configured: Option<&str>) -> PathBuf {
    match configured {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(crate::platform::expand_home(dir)),
        _ => default_state_dir(),
    }
}
