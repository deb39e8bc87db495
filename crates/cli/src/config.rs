//! Locating the tool layer configuration.

use std::path::{Path, PathBuf};

use runtime::LayerConfig;
use tracing::info;

use crate::error::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TOOLBRIDGE_CONFIG";
/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "toolbridge.toml";

/// Pick the config file: the explicit path, then `$TOOLBRIDGE_CONFIG`, then
/// `toolbridge.toml` in `cwd` if it exists.
pub fn resolve(explicit: Option<&Path>, env: Option<&str>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.map(str::trim).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let fallback = cwd.join(DEFAULT_CONFIG_FILE);
    fallback.is_file().then_some(fallback)
}

/// Load the configuration, or an empty one when no file is found.
pub fn load(explicit: Option<&Path>) -> Result<LayerConfig> {
    let env = std::env::var(CONFIG_ENV).ok();
    let cwd = std::env::current_dir()?;

    let Some(path) = resolve(explicit, env.as_deref(), &cwd) else {
        info!("no config file found; starting without servers");
        return Ok(LayerConfig::default());
    };
    if !path.exists() {
        return Err(Error::ConfigNotFound { path });
    }

    info!(path = %path.display(), "loading config");
    Ok(LayerConfig::load(&path)?)
}
