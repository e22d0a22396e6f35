use std::path::{Path, PathBuf};

/// Application directory name used by [`ProjectPaths::resolve`].
pub const APP_NAME: &str = "modweave";

/// Environment variable that puts config, scripts and logs under one directory.
pub const HOME_OVERRIDE: &str = "MODWEAVE_HOME";

/// Where a host keeps its config file, scripts and logs.
///
/// Follows the XDG base directories on Unix-like systems and `%APPDATA%` on
/// Windows. Setting `MODWEAVE_HOME` overrides both with a single directory,
/// which is handy for portable installs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    config: PathBuf,
    data: PathBuf,
}

impl ProjectPaths {
    /// Resolve directories for `name` from the process environment. `None`
    /// if no home directory can be found.
    pub fn new(name: &str) -> Option<Self> {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    pub fn resolve() -> Option<Self> {
        Self::new(APP_NAME)
    }

    /// Config and data both live directly in `root`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config: root.clone(),
            data: root,
        }
    }

    fn from_lookup(name: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty()).map(PathBuf::from);

        if let Some(root) = var(HOME_OVERRIDE) {
            return Some(Self::under(root));
        }

        if cfg!(target_os = "windows") {
            let appdata = var("APPDATA")?.join(name);
            return Some(Self {
                config: appdata.clone(),
                data: appdata,
            });
        }

        let home = var("HOME").or_else(|| var("USERPROFILE"))?;
        let config = var("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config"));
        let data = var("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share"));
        Some(Self {
            config: config.join(name),
            data: data.join(name),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Default script root when the config does not name one.
    pub fn scripts_dir(&self) -> PathBuf {
        self.data.join("scripts")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_override_puts_everything_under_one_root() {
        let paths = ProjectPaths::from_lookup(
            APP_NAME,
            lookup(&[(HOME_OVERRIDE, "/portable"), ("HOME", "/home/ana")]),
        )
        .unwrap();
        assert_eq!(paths.config_file(), PathBuf::from("/portable/config.toml"));
        assert_eq!(paths.scripts_dir(), PathBuf::from("/portable/scripts"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/portable/logs"));
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_xdg_defaults_and_overrides() {
        let paths = ProjectPaths::from_lookup(APP_NAME, lookup(&[("HOME", "/home/ana")])).unwrap();
        assert_eq!(paths.config_dir(), Path::new("/home/ana/.config/modweave"));
        assert_eq!(paths.data_dir(), Path::new("/home/ana/.local/share/modweave"));

        let paths = ProjectPaths::from_lookup(
            APP_NAME,
            lookup(&[("HOME", "/home/ana"), ("XDG_DATA_HOME", "/data"), ("XDG_CONFIG_HOME", "")]),
        )
        .unwrap();
        assert_eq!(paths.scripts_dir(), PathBuf::from("/data/modweave/scripts"));
        // Empty variables are ignored
        assert_eq!(paths.config_dir(), Path::new("/home/ana/.config/modweave"));
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_no_home_means_no_paths() {
        assert!(ProjectPaths::from_lookup(APP_NAME, lookup(&[])).is_none());
    }
}
