//! Initialize the configuration directory: create ~/.docent and a default
//! config file. The session store file is created lazily on first save.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_CONFIG: &str = include_str!("../config/default-config.json");

/// Create the config directory and a default config file if absent. Returns
/// the config directory. Existing files are left untouched.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("wrote default config to {}", config_path.display());
    } else {
        log::debug!("config already present at {}", config_path.display());
    }
    Ok(dir)
}
