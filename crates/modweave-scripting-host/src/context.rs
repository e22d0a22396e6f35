use std::path::Path;

use crate::environment::SharedEnvironment;
use crate::value::ScriptValue;

/// Name of the bundle currently initializing.
pub const MOD_NAME: &str = "MOD_NAME";
/// Directory of the bundle currently initializing.
pub const MOD_PATH: &str = "MOD_PATH";
pub const MOD_VERSION: &str = "MOD_VERSION";
/// Path of the script whose code is running.
pub const CURRENT_SCRIPT: &str = "CURRENT_SCRIPT";

pub const CONTEXT_VARIABLES: [&str; 4] = [MOD_NAME, MOD_PATH, MOD_VERSION, CURRENT_SCRIPT];

/// Sets the context variables in the shared namespace for as long as it lives.
///
/// The previous values (including absence) are captured on construction and
/// put back on drop, so every exit path of the guarded call restores them.
pub struct ContextGuard {
    globals: SharedEnvironment,
    saved: Vec<(&'static str, Option<ScriptValue>)>,
}

impl ContextGuard {
    pub fn enter(globals: &SharedEnvironment, name: &str, path: &Path, version: &str) -> Self {
        let saved = CONTEXT_VARIABLES
            .iter()
            .map(|key| (*key, globals.get(key)))
            .collect();

        globals.set(MOD_NAME, ScriptValue::from(name));
        globals.set(MOD_PATH, ScriptValue::from(path.display().to_string()));
        globals.set(MOD_VERSION, ScriptValue::from(version));
        globals.remove(CURRENT_SCRIPT);

        Self {
            globals: globals.clone(),
            saved,
        }
    }

    /// Point `CURRENT_SCRIPT` at the unit about to run.
    pub fn set_current_script(&self, path: &Path) {
        self.globals
            .set(CURRENT_SCRIPT, ScriptValue::from(path.display().to_string()));
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(value) => {
                    self.globals.set(key, value);
                }
                None => {
                    self.globals.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_previous_values() {
        let globals = SharedEnvironment::new();
        globals.set(MOD_NAME, ScriptValue::from("outer"));

        {
            let guard = ContextGuard::enter(&globals, "inner", Path::new("/mods/inner"), "1.2.0");
            guard.set_current_script(Path::new("/mods/inner/init.lua"));

            assert_eq!(globals.get(MOD_NAME), Some(ScriptValue::from("inner")));
            assert_eq!(globals.get(MOD_VERSION), Some(ScriptValue::from("1.2.0")));
            assert_eq!(
                globals.get(CURRENT_SCRIPT),
                Some(ScriptValue::from("/mods/inner/init.lua"))
            );
        }

        assert_eq!(globals.get(MOD_NAME), Some(ScriptValue::from("outer")));
        assert!(!globals.contains(MOD_PATH));
        assert!(!globals.contains(MOD_VERSION));
        assert!(!globals.contains(CURRENT_SCRIPT));
    }

    #[test]
    fn test_nested_guards_unwind_in_order() {
        let globals = SharedEnvironment::new();
        {
            let _outer = ContextGuard::enter(&globals, "a", Path::new("/a"), "1.0.0");
            {
                let _inner = ContextGuard::enter(&globals, "b", Path::new("/b"), "2.0.0");
                assert_eq!(globals.get(MOD_NAME), Some(ScriptValue::from("b")));
            }
            assert_eq!(globals.get(MOD_NAME), Some(ScriptValue::from("a")));
        }
        assert!(globals.is_empty());
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let globals = SharedEnvironment::new();
        let inner = globals.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ContextGuard::enter(&inner, "boom", Path::new("/boom"), "0.1.0");
            panic!("script host blew up");
        }));

        assert!(result.is_err());
        assert!(globals.is_empty());
    }
}
