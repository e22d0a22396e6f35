//! Global namespaces seen by guest code.
//!
//! Every script gets a [`ScriptEnvironment`] of its own. Reads look at the
//! script's locals first and then fall through to the host's
//! [`SharedEnvironment`]; writes always land in the locals. A script can shadow
//! a host global without its siblings or the host ever seeing the change.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::value::{ScriptFunction, ScriptValue};

/// The host's global namespace, shared by every script environment.
#[derive(Clone, Default)]
pub struct SharedEnvironment {
    globals: Rc<RefCell<BTreeMap<String, ScriptValue>>>,
}

impl SharedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        self.globals.borrow().get(name).cloned()
    }

    /// Set a global, returning the previous value. Setting `Nil` removes it.
    pub fn set(&self, name: impl Into<String>, value: ScriptValue) -> Option<ScriptValue> {
        let name = name.into();
        if value.is_nil() {
            return self.globals.borrow_mut().remove(&name);
        }
        self.globals.borrow_mut().insert(name, value)
    }

    pub fn remove(&self, name: &str) -> Option<ScriptValue> {
        self.globals.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.globals.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.globals.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.globals.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &SharedEnvironment) -> bool {
        Rc::ptr_eq(&self.globals, &other.globals)
    }
}

impl fmt::Debug for SharedEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEnvironment")
            .field("globals", &self.names())
            .finish()
    }
}

/// A per-script environment: local bindings over a read-only view of the host globals.
#[derive(Clone)]
pub struct ScriptEnvironment {
    locals: Rc<RefCell<BTreeMap<String, ScriptValue>>>,
    shared: SharedEnvironment,
}

impl ScriptEnvironment {
    pub fn new(shared: SharedEnvironment) -> Self {
        Self {
            locals: Rc::new(RefCell::new(BTreeMap::new())),
            shared,
        }
    }

    /// Look a name up locally, then in the host globals.
    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        if let Some(value) = self.locals.borrow().get(name) {
            return Some(value.clone());
        }
        self.shared.get(name)
    }

    pub fn get_local(&self, name: &str) -> Option<ScriptValue> {
        self.locals.borrow().get(name).cloned()
    }

    /// Bind a name locally. Setting `Nil` drops the local so the host global shows through again.
    pub fn set(&self, name: impl Into<String>, value: ScriptValue) {
        let name = name.into();
        if value.is_nil() {
            self.locals.borrow_mut().remove(&name);
        } else {
            self.locals.borrow_mut().insert(name, value);
        }
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.locals.borrow().contains_key(name)
    }

    /// A function bound locally under `name`, ignoring host globals.
    pub fn local_function(&self, name: &str) -> Option<ScriptFunction> {
        match self.locals.borrow().get(name) {
            Some(ScriptValue::Function(function)) => Some(function.clone()),
            _ => None,
        }
    }

    pub fn local_names(&self) -> Vec<String> {
        self.locals.borrow().keys().cloned().collect()
    }

    pub fn shared(&self) -> &SharedEnvironment {
        &self.shared
    }

    pub fn ptr_eq(&self, other: &ScriptEnvironment) -> bool {
        Rc::ptr_eq(&self.locals, &other.locals)
    }
}

impl fmt::Debug for ScriptEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEnvironment")
            .field("locals", &self.local_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_fall_through_to_shared() {
        let shared = SharedEnvironment::new();
        shared.set("HostVersion", ScriptValue::from("1.0"));
        let env = ScriptEnvironment::new(shared.clone());

        assert_eq!(env.get("HostVersion"), Some(ScriptValue::from("1.0")));
        assert!(!env.contains_local("HostVersion"));
    }

    #[test]
    fn test_writes_stay_local() {
        let shared = SharedEnvironment::new();
        let a = ScriptEnvironment::new(shared.clone());
        let b = ScriptEnvironment::new(shared.clone());

        a.set("only_in_a", ScriptValue::Int(1));

        assert_eq!(a.get("only_in_a"), Some(ScriptValue::Int(1)));
        assert_eq!(b.get("only_in_a"), None, "sibling must not see A's global");
        assert!(!shared.contains("only_in_a"), "host must not see A's global");
    }

    #[test]
    fn test_shadowing_does_not_corrupt_host() {
        let shared = SharedEnvironment::new();
        shared.set("print", ScriptValue::from("host print"));
        let env = ScriptEnvironment::new(shared.clone());

        env.set("print", ScriptValue::from("my print"));
        assert_eq!(env.get("print"), Some(ScriptValue::from("my print")));
        assert_eq!(shared.get("print"), Some(ScriptValue::from("host print")));

        // Clearing the local lets the host global show through again
        env.set("print", ScriptValue::Nil);
        assert_eq!(env.get("print"), Some(ScriptValue::from("host print")));
    }

    #[test]
    fn test_local_function_ignores_shared() {
        let shared = SharedEnvironment::new();
        shared.set(
            "Initialize",
            ScriptValue::Function(ScriptFunction::new(|_, _| Ok(ScriptValue::Nil))),
        );
        let env = ScriptEnvironment::new(shared);
        assert!(env.local_function("Initialize").is_none());
        assert!(env.get("Initialize").is_some());
    }
}
