use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{paths::ProjectPaths, scripting_config::ScriptingConfig};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found")]
    NotFound,
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("IO error reading config: {0}")]
    IoError(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Scripting configuration
    #[serde(default)]
    pub scripting: ScriptingConfig,

    /// Also write logs to `<data dir>/logs/<component>.log`
    #[serde(default)]
    pub log_to_file: bool,
}

impl HostConfig {
    pub fn config_path() -> PathBuf {
        ProjectPaths::resolve()
            .map(|p| p.config_file())
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = HostConfig::load_from(&dir.path().join("config.toml"));
        assert!(matches!(result, Err(ConfigLoadError::NotFound)));
    }

    #[test]
    fn test_parse_scripting_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
log_to_file = true

[scripting]
script_dir = "/srv/scripts"
hot_reload = false
disabled_bundles = ["broken_mod"]
"#,
        )
        .unwrap();

        let config = HostConfig::load_from(&path).unwrap();
        assert!(config.log_to_file);
        assert!(!config.scripting.hot_reload);
        assert_eq!(config.scripting.script_dir(), PathBuf::from("/srv/scripts"));
        assert_eq!(config.scripting.disabled_bundles, vec!["broken_mod"]);
        // Untouched keys keep their defaults
        assert_eq!(config.scripting.tick_interval_ms, 50);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scripting\nenabled = ").unwrap();

        let result = HostConfig::load_from(&path);
        assert!(matches!(result, Err(ConfigLoadError::ParseError(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = HostConfig::default();
        config.scripting.tick_interval_ms = 16;

        config.save_to(&path).unwrap();
        let loaded = HostConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scripting.tick_interval_ms, 16);
    }
}
