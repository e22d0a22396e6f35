use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::paths::ProjectPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Whether scripting is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing scripts (default: ~/.local/share/modweave/scripts)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Whether file-watch hot reload is enabled (default: true)
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Quiet period a changed file must see before it is reloaded
    #[serde(default = "default_settle_ms")]
    pub hot_reload_settle_ms: u64,

    /// Poll interval for watcher backends that fall back to polling
    #[serde(default = "default_poll_ms")]
    pub hot_reload_poll_ms: u64,

    /// Interval between `Update` calls (default: 50ms = 20Hz)
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,

    /// Bundle IDs (folder names) that are discovered but never loaded
    #[serde(default)]
    pub disabled_bundles: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_settle_ms() -> u64 {
    250
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            hot_reload: true,
            hot_reload_settle_ms: default_settle_ms(),
            hot_reload_poll_ms: default_poll_ms(),
            tick_interval_ms: default_tick_ms(),
            disabled_bundles: Vec::new(),
        }
    }
}

impl ScriptingConfig {
    /// Get the script directory path (use provided or default)
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(|| {
            ProjectPaths::resolve()
                .map(|p| p.scripts_dir())
                .unwrap_or_else(|| PathBuf::from("scripts"))
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.hot_reload_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload_poll_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScriptingConfig::default();
        assert!(config.enabled);
        assert!(config.hot_reload, "Hot reload should be enabled by default");
        assert_eq!(config.settle_delay(), Duration::from_millis(250));
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert!(config.disabled_bundles.is_empty());
    }

    #[test]
    fn test_empty_table_uses_defaults() {
        let config: ScriptingConfig = toml::from_str("").unwrap();
        assert!(config.enabled);
        assert!(config.hot_reload);
        assert_eq!(config.hot_reload_poll_ms, 1000);
    }

    #[test]
    fn test_explicit_script_dir_wins() {
        let config = ScriptingConfig {
            script_dir: Some(PathBuf::from("/opt/game/scripts")),
            ..Default::default()
        };
        assert_eq!(config.script_dir(), PathBuf::from("/opt/game/scripts"));
    }

    #[test]
    fn test_zero_tick_interval_is_clamped() {
        let config = ScriptingConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
