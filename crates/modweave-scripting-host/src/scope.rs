use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::environment::ScriptEnvironment;
use crate::error::ScriptError;
use crate::value::{ScriptFunction, ScriptValue};

/// Identity of a script file: its path plus the short name derived from the file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId {
    path: PathBuf,
    name: String,
}

impl ScriptId {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chunk name handed to the engine, e.g. `init.lua`.
    pub fn chunk_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Named values a bundle exposes to other bundles.
#[derive(Clone, Default)]
pub struct ExportTable {
    values: Rc<RefCell<BTreeMap<String, ScriptValue>>>,
}

impl ExportTable {
    pub fn set(&self, key: impl Into<String>, value: ScriptValue) {
        self.values.borrow_mut().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<ScriptValue> {
        self.values.borrow().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// Bundle ID → export table, readable by every script through `GetModExport`.
#[derive(Clone, Default, Debug)]
pub struct ExportRegistry {
    tables: Rc<RefCell<BTreeMap<String, ExportTable>>>,
}

impl ExportRegistry {
    pub fn insert(&self, bundle: impl Into<String>, table: ExportTable) {
        self.tables.borrow_mut().insert(bundle.into(), table);
    }

    pub fn get(&self, bundle: &str, key: &str) -> Option<ScriptValue> {
        self.tables.borrow().get(bundle).and_then(|table| table.get(key))
    }
}

/// The bundle a script belongs to, as seen from inside a call.
#[derive(Debug, Clone)]
pub struct BundleScope {
    pub id: String,
    pub exports: ExportTable,
}

/// What a guest call runs as: the script's identity, environment and owned commands.
///
/// A fresh scope is built on every (re)load, so anything recorded against a
/// previous load generation can be told apart with [`ScriptScope::same_scope`].
#[derive(Clone)]
pub struct ScriptScope {
    id: Rc<ScriptId>,
    env: ScriptEnvironment,
    commands: Rc<RefCell<BTreeSet<String>>>,
    bundle: Option<BundleScope>,
}

impl ScriptScope {
    pub fn new(id: Rc<ScriptId>, env: ScriptEnvironment, bundle: Option<BundleScope>) -> Self {
        Self {
            id,
            env,
            commands: Rc::new(RefCell::new(BTreeSet::new())),
            bundle,
        }
    }

    pub fn id(&self) -> &ScriptId {
        &self.id
    }

    pub fn env(&self) -> &ScriptEnvironment {
        &self.env
    }

    pub fn bundle(&self) -> Option<&BundleScope> {
        self.bundle.as_ref()
    }

    /// Bind a host-implemented function in this script's environment.
    pub fn define_function<F>(&self, name: &str, body: F)
    where
        F: Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError> + 'static,
    {
        self.env
            .set(name, ScriptValue::Function(ScriptFunction::named(name, body)));
    }

    /// Commands registered while running as this scope.
    pub fn owned_commands(&self) -> Vec<String> {
        self.commands.borrow().iter().cloned().collect()
    }

    pub fn owns_command(&self, name: &str) -> bool {
        self.commands.borrow().contains(name)
    }

    pub(crate) fn record_command(&self, name: &str) {
        self.commands.borrow_mut().insert(name.to_string());
    }

    pub(crate) fn forget_command(&self, name: &str) {
        self.commands.borrow_mut().remove(name);
    }

    pub fn same_scope(&self, other: &ScriptScope) -> bool {
        Rc::ptr_eq(&self.commands, &other.commands)
    }
}

impl fmt::Debug for ScriptScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptScope")
            .field("id", &self.id.path)
            .field("commands", &self.owned_commands())
            .field("bundle", &self.bundle.as_ref().map(|b| b.id.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SharedEnvironment;

    #[test]
    fn test_script_id_names() {
        let id = ScriptId::from_path("/mods/fishing/init.lua");
        assert_eq!(id.name(), "init");
        assert_eq!(id.chunk_name(), "init.lua");
    }

    #[test]
    fn test_fresh_scope_has_new_identity() {
        let id = Rc::new(ScriptId::from_path("a.lua"));
        let shared = SharedEnvironment::new();
        let first = ScriptScope::new(id.clone(), ScriptEnvironment::new(shared.clone()), None);
        let second = ScriptScope::new(id, ScriptEnvironment::new(shared), None);

        assert!(first.same_scope(&first.clone()));
        assert!(!first.same_scope(&second));
    }

    #[test]
    fn test_export_registry_lookup() {
        let registry = ExportRegistry::default();
        let table = ExportTable::default();
        registry.insert("economy", table.clone());
        table.set("tax_rate", ScriptValue::Float(0.1));

        assert_eq!(
            registry.get("economy", "tax_rate"),
            Some(ScriptValue::Float(0.1))
        );
        assert_eq!(registry.get("economy", "missing"), None);
        assert_eq!(registry.get("nobody", "tax_rate"), None);
    }
}
