//! Bundle discovery and dependency-ordered loading.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::bundle::Bundle;
use crate::error::BundleError;
use crate::events::HostEvent;
use crate::host::ScriptHost;
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::reload::normalize_path;
use crate::unit::ScriptUnit;
use crate::value::ScriptValue;

struct Candidate {
    dir: PathBuf,
    manifest: Manifest,
}

pub struct BundleManager {
    host: ScriptHost,
    /// In load order; dependencies always precede their dependents.
    bundles: Vec<Bundle>,
    processed: HashSet<PathBuf>,
    failures: BTreeMap<String, BundleError>,
    disabled: BTreeSet<String>,
}

impl BundleManager {
    pub fn new(host: ScriptHost) -> Self {
        Self {
            host,
            bundles: Vec::new(),
            processed: HashSet::new(),
            failures: BTreeMap::new(),
            disabled: BTreeSet::new(),
        }
    }

    /// Bundle IDs that are never loaded. Dependents of a disabled bundle fail.
    pub fn set_disabled<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = ids.into_iter().map(Into::into).collect();
    }

    /// Load and initialize every bundle directly under `root`. Returns how
    /// many bundles were loaded by this call.
    pub fn discover_and_load(&mut self, root: &Path) -> usize {
        if !root.is_dir() {
            warn!(target: "scripting", "Script directory {} does not exist; no bundles loaded", root.display());
            return 0;
        }
        let root = normalize_path(root);

        let mut dirs: Vec<PathBuf> = match fs::read_dir(&root) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
                .collect(),
            Err(e) => {
                error!(target: "scripting", "Failed to read script directory {}: {}", root.display(), e);
                return 0;
            }
        };
        dirs.sort();

        let extension = self.host.extension().to_string();
        let mut order: Vec<String> = Vec::new();
        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        for dir in dirs {
            let Some(id) = dir.file_name().map(|name| name.to_string_lossy().into_owned()) else {
                continue;
            };
            if self.get_mod(&id).is_none() {
                // A rescan retries bundles that failed before
                self.failures.remove(&id);
                self.processed.retain(|path| !path.starts_with(&dir));
            }
            match Manifest::load(&dir, &extension) {
                Ok(manifest) => {
                    self.processed.insert(manifest.entry_path(&dir));
                    self.processed.extend(manifest.companion_paths(&dir));
                    order.push(id.clone());
                    candidates.insert(id, Candidate { dir, manifest });
                }
                Err(e) => {
                    error!(target: "scripting", "Skipping bundle '{}': {}", id, e);
                    self.failures.insert(id, e.into());
                }
            }
        }

        order.sort_by_key(|id| candidates.get(id).map_or(0, |c| c.manifest.load_order));
        debug!(target: "scripting", "Bundle discovery order: {:?}", order);

        let before = self.bundles.len();
        let mut visiting = Vec::new();
        for id in &order {
            self.ensure_loaded(id, &candidates, &mut visiting);
        }

        let loaded = self.bundles.len() - before;
        info!(
            target: "scripting",
            "Loaded {} of {} bundle(s) from {}",
            loaded,
            order.len(),
            root.display()
        );
        loaded
    }

    fn ensure_loaded(
        &mut self,
        id: &str,
        candidates: &BTreeMap<String, Candidate>,
        visiting: &mut Vec<String>,
    ) -> bool {
        if self.get_mod(id).is_some() {
            return true;
        }
        if self.failures.contains_key(id) {
            return false;
        }
        let Some(candidate) = candidates.get(id) else {
            return false;
        };

        if let Some(start) = visiting.iter().position(|v| v == id) {
            let mut cycle = visiting[start..].to_vec();
            cycle.push(id.to_string());
            for member in &visiting[start..] {
                self.fail(member, BundleError::DependencyCycle(cycle.clone()));
            }
            return false;
        }

        if self.disabled.contains(id) {
            self.fail(id, BundleError::Disabled(id.to_string()));
            return false;
        }

        visiting.push(id.to_string());
        for dependency in &candidate.manifest.dependencies {
            let known = candidates.contains_key(dependency) || self.get_mod(dependency).is_some();
            let failure = if !known {
                Some(BundleError::MissingDependency {
                    bundle: id.to_string(),
                    dependency: dependency.clone(),
                })
            } else if !self.ensure_loaded(dependency, candidates, visiting) {
                Some(BundleError::DependencyFailed {
                    bundle: id.to_string(),
                    dependency: dependency.clone(),
                })
            } else {
                None
            };

            if let Some(failure) = failure {
                visiting.pop();
                // Cycle members already carry the cycle diagnostic
                if !self.failures.contains_key(id) {
                    self.fail(id, failure);
                }
                return false;
            }
        }
        visiting.pop();

        match Bundle::load(&candidate.dir, candidate.manifest.clone(), &self.host) {
            Ok(mut bundle) => {
                if !bundle.initialize() {
                    warn!(target: "scripting", "Bundle '{}' loaded but did not initialize", id);
                }
                self.processed.extend(bundle.script_paths());
                self.bundles.push(bundle);
                true
            }
            Err(e) => {
                self.fail(id, e);
                false
            }
        }
    }

    fn fail(&mut self, id: &str, err: BundleError) {
        error!(target: "scripting", "Bundle '{}' not loaded: {}", id, err);
        self.failures.insert(id.to_string(), err);
    }

    pub fn get_mod(&self, id: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|bundle| bundle.id() == id)
    }

    pub fn get_mod_mut(&mut self, id: &str) -> Option<&mut Bundle> {
        self.bundles.iter_mut().find(|bundle| bundle.id() == id)
    }

    pub fn get_mod_export(&self, id: &str, key: &str) -> Option<ScriptValue> {
        self.get_mod(id).and_then(|bundle| bundle.get_export(key))
    }

    /// Whether a bundle claims `path`, so the standalone loader must leave it alone.
    pub fn is_script_path_processed(&self, path: &Path) -> bool {
        self.processed.contains(path) || self.bundles.iter().any(|bundle| bundle.owns(path))
    }

    /// The bundle directory `path` lives in, if any.
    pub fn bundle_for_path(&self, path: &Path) -> Option<&Bundle> {
        self.bundles.iter().find(|bundle| path.starts_with(bundle.dir()))
    }

    pub fn find_unit(&self, path: &Path) -> Option<&ScriptUnit> {
        self.bundles.iter().find_map(|bundle| bundle.unit(path))
    }

    /// Reload a bundle script. `None` if no bundle has a unit for `path`.
    pub fn reload_script(&mut self, path: &Path) -> Option<bool> {
        self.bundles
            .iter_mut()
            .find_map(|bundle| bundle.reload_script(path))
    }

    /// Reload every unit of every bundle, in load order.
    pub fn reload_all(&mut self) -> usize {
        let mut reloaded = 0;
        for bundle in &mut self.bundles {
            for path in bundle.script_paths() {
                if !path.is_file() {
                    continue;
                }
                if bundle.reload_script(&path) == Some(true) {
                    reloaded += 1;
                }
            }
        }
        reloaded
    }

    pub fn trigger_event(&mut self, event: HostEvent, args: &[ScriptValue]) -> usize {
        self.bundles
            .iter_mut()
            .map(|bundle| bundle.trigger_event(event, args))
            .sum()
    }

    pub fn update_all(&mut self, delta: f64) {
        for bundle in &mut self.bundles {
            bundle.update(delta);
        }
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn bundle_ids(&self) -> Vec<&str> {
        self.bundles.iter().map(Bundle::id).collect()
    }

    pub fn failures(&self) -> &BTreeMap<String, BundleError> {
        &self.failures
    }

    pub fn script_count(&self) -> usize {
        self.bundles.iter().map(|bundle| bundle.units().len()).sum()
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
