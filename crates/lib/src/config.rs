//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.docent/config.json`) and
//! environment. A missing file means defaults; the backend base URL can be
//! overridden with `DOCENT_BACKEND_URL`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Retrieval backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Local session storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Voice input/output settings.
    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the retrieval backend (default "http://localhost:8000").
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
        }
    }
}

fn default_backend_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Session store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Override the sessions file. Relative paths are resolved against the
    /// config file's parent. Omit for `sessions.json` next to the config.
    #[serde(default)]
    pub sessions_path: Option<PathBuf>,
}

/// Voice settings. Everything degrades gracefully when the tools are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Master switch for the voice UI (default true).
    #[serde(default = "default_voice_enabled")]
    pub enabled: bool,

    /// Synthesizer binary (e.g. "espeak-ng", "say"). Auto-detected when unset.
    pub synthesizer: Option<String>,

    /// Capture binary (e.g. "arecord", "rec"). Auto-detected when unset.
    pub recorder: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: default_voice_enabled(),
            synthesizer: None,
            recorder: None,
        }
    }
}

fn default_voice_enabled() -> bool {
    true
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DOCENT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".docent").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the backend base URL: env DOCENT_BACKEND_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> String {
    std::env::var("DOCENT_BACKEND_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.backend.base_url.clone())
}

/// Resolve the sessions file: `storage.sessionsPath` if set (relative paths
/// resolved against the config file's parent), otherwise `sessions.json`
/// next to the config file.
pub fn resolve_sessions_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.storage.sessions_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("sessions.json"),
    }
}

/// Load config from the default path (or DOCENT_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used (for
/// resolving sibling files).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert!(config.voice.enabled);
        assert!(config.storage.sessions_path.is_none());
    }

    #[test]
    fn resolve_sessions_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.docent/config.json");
        assert_eq!(
            resolve_sessions_path(&config, path),
            PathBuf::from("/home/user/.docent/sessions.json")
        );
    }

    #[test]
    fn resolve_sessions_path_override_relative() {
        let mut config = Config::default();
        config.storage.sessions_path = Some(PathBuf::from("data/sessions.json"));
        let path = Path::new("/home/user/.docent/config.json");
        assert_eq!(
            resolve_sessions_path(&config, path),
            PathBuf::from("/home/user/.docent/data/sessions.json")
        );
    }

    #[test]
    fn resolve_sessions_path_override_absolute() {
        let mut config = Config::default();
        config.storage.sessions_path = Some(PathBuf::from("/var/docent/sessions.json"));
        let path = Path::new("/home/user/.docent/config.json");
        assert_eq!(
            resolve_sessions_path(&config, path),
            PathBuf::from("/var/docent/sessions.json")
        );
    }

    #[test]
    fn parses_partial_config() {
        let config: Config =
            serde_json::from_str(r#"{"backend": {"baseUrl": "http://10.0.0.5:8000"}}"#).unwrap();
        assert_eq!(config.backend.base_url, "http://10.0.0.5:8000");
        assert!(config.voice.enabled, "untouched sections keep defaults");
    }
}
