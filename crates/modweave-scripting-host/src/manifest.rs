use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ManifestError;

/// File that marks a directory as a bundle.
pub const MANIFEST_FILE: &str = "mod.json";

/// Host API version bundles are checked against.
pub const HOST_API_VERSION: &str = "1.0";

fn default_version() -> String {
    "0.0.0".to_string()
}

/// A bundle manifest as stored in `mod.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Display name. Defaults to the bundle folder name.
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub description: String,

    /// Entry script, relative to the bundle directory.
    #[serde(default)]
    pub main: Option<String>,

    /// Companion scripts, relative to the bundle directory.
    #[serde(default)]
    pub files: Vec<String>,

    /// Bundle IDs (folder names) that must be loaded first.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub load_order: i32,

    /// Minimum host API version the bundle needs.
    #[serde(default)]
    pub api_version: Option<String>,
}

impl Manifest {
    /// Read and parse `dir/mod.json`. The returned manifest is normalized for
    /// scripts with extension `extension`.
    pub fn load(dir: &Path, extension: &str) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(ManifestError::NotFound(path));
        }

        let contents = fs::read_to_string(&path).map_err(|e| ManifestError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let mut manifest: Manifest =
            serde_json::from_str(&contents).map_err(|e| ManifestError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let folder = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        manifest.normalize(&folder, extension);
        Ok(manifest)
    }

    /// Fill defaults that depend on the folder and engine, and drop the entry
    /// file from the companion list if it was listed there.
    pub fn normalize(&mut self, folder: &str, extension: &str) {
        if self.name.trim().is_empty() {
            self.name = folder.to_string();
        }

        let main = match self.main.take() {
            Some(main) if !main.trim().is_empty() => with_extension(main.trim(), extension),
            _ => format!("init.{}", extension),
        };

        let before = self.files.len();
        self.files.retain(|file| file != &main);
        if self.files.len() != before {
            warn!(
                target: "scripting",
                "Bundle '{}' lists its entry file {} under files; ignoring that entry",
                self.name, main
            );
        }
        self.main = Some(main);
    }

    /// Entry file name after normalization.
    pub fn entry(&self) -> &str {
        self.main.as_deref().unwrap_or("init")
    }

    pub fn entry_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.entry())
    }

    pub fn companion_paths(&self, dir: &Path) -> Vec<PathBuf> {
        self.files.iter().map(|file| dir.join(file)).collect()
    }

    /// True when the bundle does not ask for a newer host API than `host`.
    pub fn is_compatible_with(&self, host: &str) -> bool {
        match &self.api_version {
            Some(required) => compare_versions(required, host) != Ordering::Greater,
            None => true,
        }
    }
}

fn with_extension(file: &str, extension: &str) -> String {
    if Path::new(file).extension().is_some() {
        file.to_string()
    } else {
        format!("{}.{}", file, extension)
    }
}

/// Compare dotted numeric versions. Missing components count as zero and
/// non-numeric components compare as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, contents: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), contents).unwrap();
    }

    #[test]
    fn test_defaults() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("fishing");
        write_manifest(&dir, "{}");

        let manifest = Manifest::load(&dir, "lua").unwrap();
        assert_eq!(manifest.name, "fishing");
        assert_eq!(manifest.version, "0.0.0");
        assert_eq!(manifest.entry(), "init.lua");
        assert!(manifest.files.is_empty());
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.load_order, 0);
        assert!(manifest.api_version.is_none());
    }

    #[test]
    fn test_main_without_extension() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("economy");
        write_manifest(
            &dir,
            r#"{"name": "Economy", "main": "init", "files": ["shop.lua"], "dependencies": ["core"]}"#,
        );

        let manifest = Manifest::load(&dir, "lua").unwrap();
        assert_eq!(manifest.name, "Economy");
        assert_eq!(manifest.entry_path(&dir), dir.join("init.lua"));
        assert_eq!(manifest.companion_paths(&dir), vec![dir.join("shop.lua")]);
        assert_eq!(manifest.dependencies, vec!["core"]);
    }

    #[test]
    fn test_entry_listed_in_files_is_dropped() {
        let mut manifest: Manifest =
            serde_json::from_str(r#"{"main": "main.lua", "files": ["main.lua", "ui.lua"]}"#)
                .unwrap();
        manifest.normalize("ui_mod", "lua");

        assert_eq!(manifest.entry(), "main.lua");
        assert_eq!(manifest.files, vec!["ui.lua"]);
    }

    #[test]
    fn test_missing_and_malformed() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Manifest::load(temp.path(), "lua"),
            Err(ManifestError::NotFound(_))
        ));

        let dir = temp.path().join("broken");
        write_manifest(&dir, "{ not json");
        assert!(matches!(
            Manifest::load(&dir, "lua"),
            Err(ManifestError::Parse { .. })
        ));
    }

    #[test]
    fn test_api_version_gate() {
        let mut manifest: Manifest = serde_json::from_str("{}").unwrap();
        assert!(manifest.is_compatible_with(HOST_API_VERSION));

        manifest.api_version = Some("1.0.0".to_string());
        assert!(manifest.is_compatible_with("1.0"));

        manifest.api_version = Some("0.9".to_string());
        assert!(manifest.is_compatible_with("1.0"));

        manifest.api_version = Some("1.2".to_string());
        assert!(!manifest.is_compatible_with("1.0"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("v2", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0-beta", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.3", "1"), Ordering::Less);
    }
}
