//! A manifest-described group of scripts loaded and initialized together.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::context::ContextGuard;
use crate::error::BundleError;
use crate::events::HostEvent;
use crate::host::ScriptHost;
use crate::manifest::{Manifest, HOST_API_VERSION};
use crate::scope::{BundleScope, ExportTable};
use crate::unit::ScriptUnit;
use crate::value::ScriptValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Loaded,
    Initializing,
    Initialized,
    Failed,
}

pub struct Bundle {
    id: String,
    dir: PathBuf,
    manifest: Manifest,
    host: ScriptHost,
    exports: ExportTable,
    /// Entry unit first, then companions in manifest order.
    units: Vec<ScriptUnit>,
    state: BundleState,
}

impl Bundle {
    /// Load every script of the bundle in `dir`. Fails if the bundle is not
    /// compatible with this host or its entry script cannot be loaded.
    /// Companions that fail to load, or whose file is missing, are logged and
    /// keep a unit for a later reload.
    pub fn load(dir: &Path, manifest: Manifest, host: &ScriptHost) -> Result<Self, BundleError> {
        let id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| manifest.name.clone());

        if !manifest.is_compatible_with(HOST_API_VERSION) {
            return Err(BundleError::IncompatibleApi {
                bundle: id,
                required: manifest.api_version.clone().unwrap_or_default(),
                provided: HOST_API_VERSION.to_string(),
            });
        }

        let entry_path = manifest.entry_path(dir);
        if !entry_path.is_file() {
            return Err(BundleError::MissingEntry(entry_path));
        }

        let exports = ExportTable::default();
        let scope = BundleScope {
            id: id.clone(),
            exports: exports.clone(),
        };

        let mut bundle = Self {
            id,
            dir: dir.to_path_buf(),
            manifest,
            host: host.clone(),
            exports,
            units: Vec::new(),
            state: BundleState::Loaded,
        };

        let guard = bundle.enter_context();
        guard.set_current_script(&entry_path);
        let mut entry = ScriptUnit::new(&entry_path, host.clone(), Some(scope.clone()));
        if !entry.load() {
            return Err(BundleError::EntryFailed(entry_path));
        }
        bundle.units.push(entry);

        for path in bundle.manifest.companion_paths(dir) {
            let mut unit = ScriptUnit::new(&path, host.clone(), Some(scope.clone()));
            if path.is_file() {
                guard.set_current_script(&path);
                unit.load();
            } else {
                // Unloaded until the file shows up and gets reloaded
                warn!(
                    target: "scripting",
                    "Bundle '{}' lists {} but the file does not exist",
                    bundle.id,
                    path.display()
                );
            }
            bundle.units.push(unit);
        }
        drop(guard);

        host.exports().insert(bundle.id.clone(), bundle.exports.clone());
        info!(
            target: "scripting",
            "Loaded bundle '{}' v{} ({} script(s))",
            bundle.id,
            bundle.manifest.version,
            bundle.units.len()
        );
        Ok(bundle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == BundleState::Initialized
    }

    pub fn entry(&self) -> &ScriptUnit {
        &self.units[0]
    }

    pub fn units(&self) -> &[ScriptUnit] {
        &self.units
    }

    pub fn unit(&self, path: &Path) -> Option<&ScriptUnit> {
        self.units.iter().find(|unit| unit.path() == path)
    }

    pub fn script_paths(&self) -> Vec<PathBuf> {
        self.units.iter().map(|unit| unit.path().to_path_buf()).collect()
    }

    /// Whether `path` is one of this bundle's declared scripts.
    pub fn owns(&self, path: &Path) -> bool {
        self.unit(path).is_some()
            || self.manifest.entry_path(&self.dir) == path
            || self.manifest.companion_paths(&self.dir).iter().any(|p| p == path)
    }

    /// Initialize the entry script, then every companion the entry does not
    /// pull in itself.
    pub fn initialize(&mut self) -> bool {
        match self.state {
            BundleState::Initialized => return true,
            BundleState::Initializing => {
                warn!(target: "scripting", "Bundle '{}' is already initializing", self.id);
                return false;
            }
            BundleState::Failed => return false,
            BundleState::Loaded => {}
        }

        self.state = BundleState::Initializing;
        let guard = self.enter_context();

        let (entry, companions) = self.units.split_at_mut(1);
        let entry = &mut entry[0];
        guard.set_current_script(entry.path());
        if !entry.initialize() {
            error!(
                target: "scripting",
                "Bundle '{}' entry script failed to initialize; companions skipped",
                self.id
            );
            self.state = BundleState::Failed;
            return false;
        }

        let on_demand = entry.required_modules().to_vec();
        for unit in companions.iter_mut() {
            if on_demand.iter().any(|module| module == unit.name()) {
                debug!(
                    target: "scripting",
                    "Skipping {} in '{}': loaded on demand by the entry script",
                    unit.name(),
                    self.id
                );
                continue;
            }
            unit.keep_initialized();
            if !unit.is_loaded() {
                continue;
            }
            guard.set_current_script(unit.path());
            if !unit.initialize() {
                warn!(target: "scripting", "Companion {} in '{}' failed to initialize", unit.name(), self.id);
            }
        }
        drop(guard);

        self.state = BundleState::Initialized;
        info!(target: "scripting", "Initialized bundle '{}'", self.id);
        true
    }

    pub fn update(&mut self, delta: f64) {
        if self.state != BundleState::Initialized {
            return;
        }
        for unit in &mut self.units {
            unit.update(delta);
        }
    }

    /// Deliver to the entry script first, then to the companions. Returns how
    /// many handlers ran successfully.
    pub fn trigger_event(&mut self, event: HostEvent, args: &[ScriptValue]) -> usize {
        if self.state != BundleState::Initialized {
            return 0;
        }
        let mut handled = 0;
        for unit in &mut self.units {
            if unit.trigger_event(event, args) {
                handled += 1;
            }
        }
        handled
    }

    pub fn set_export(&self, key: impl Into<String>, value: ScriptValue) {
        self.exports.set(key, value);
    }

    pub fn get_export(&self, key: &str) -> Option<ScriptValue> {
        self.exports.get(key)
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Reload the entry script.
    pub fn reload(&mut self) -> bool {
        let entry = self.manifest.entry_path(&self.dir);
        self.reload_script(&entry).unwrap_or(false)
    }

    /// Reload one of the bundle's scripts. `None` if the bundle has no unit
    /// for `path`.
    pub fn reload_script(&mut self, path: &Path) -> Option<bool> {
        let index = self.units.iter().position(|unit| unit.path() == path)?;

        let reloaded = {
            let guard = self.enter_context();
            guard.set_current_script(path);
            self.units[index].reload()
        };

        // An entry that never got through initialization gets another try
        if reloaded && index == 0 && self.state == BundleState::Failed {
            self.state = BundleState::Loaded;
            return Some(self.initialize());
        }
        Some(reloaded)
    }

    fn enter_context(&self) -> ContextGuard {
        ContextGuard::enter(
            self.host.globals(),
            &self.id,
            &self.dir,
            &self.manifest.version,
        )
    }
}
