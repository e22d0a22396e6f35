//! The seam between the runtime and whatever interpreter executes guest code.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::environment::ScriptEnvironment;
use crate::error::ScriptError;
use crate::scope::ScriptScope;
use crate::value::{ScriptFunction, ScriptValue};

/// An embedded interpreter.
///
/// The runtime only ever compiles a chunk against a script environment and
/// calls functions; everything else about the guest language stays behind
/// this trait.
pub trait ScriptEngine {
    /// Extension of script files this engine understands, without the dot.
    fn file_extension(&self) -> &str;

    /// Compile `source` into a callable chunk bound to `env`.
    fn compile(
        &self,
        source: &str,
        chunk_name: &str,
        env: &ScriptEnvironment,
    ) -> Result<ScriptFunction, ScriptError>;

    /// Call a guest or host function as `scope`.
    fn call(
        &self,
        function: &ScriptFunction,
        scope: &ScriptScope,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, ScriptError> {
        function.call(scope, args)
    }

    /// Module names a chunk pulls in on demand (its `require` calls).
    fn required_modules(&self, source: &str) -> Vec<String> {
        scan_require_calls(source)
    }
}

/// Find `require "name"` / `require('name')` calls and return the last path segment of each.
pub fn scan_require_calls(source: &str) -> Vec<String> {
    const KEYWORD: &str = "require";
    let mut modules: Vec<String> = Vec::new();
    let bytes = source.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = source[search_from..].find(KEYWORD) {
        let start = search_from + offset;
        let end = start + KEYWORD.len();
        search_from = end;

        let preceded_by_ident = start > 0 && is_ident_byte(bytes[start - 1]);
        let followed_by_ident = end < bytes.len() && is_ident_byte(bytes[end]);
        if preceded_by_ident || followed_by_ident {
            continue;
        }

        let rest = source[end..].trim_start();
        let rest = rest.strip_prefix('(').map(str::trim_start).unwrap_or(rest);
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let Some(close) = rest[1..].find(quote) else {
            continue;
        };
        let module = &rest[1..1 + close];
        let name = module
            .rsplit(['.', '/'])
            .next()
            .unwrap_or(module)
            .to_string();
        if !name.is_empty() && !modules.contains(&name) {
            modules.push(name);
        }
    }

    modules
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Body of a program registered with [`NativeEngine`]. It runs as the script's
/// top-level chunk and its return value becomes the module export.
pub type NativeProgram = Rc<dyn Fn(&ScriptScope) -> Result<ScriptValue, ScriptError>>;

/// An engine whose scripts are Rust closures.
///
/// A script file selects its program with a `#!native <name>` directive on its
/// first non-comment line; the rest of the file is free-form (comments,
/// `require` lines). Hosts use it to ship built-in scripts through the same
/// lifecycle as guest code.
pub struct NativeEngine {
    extension: String,
    programs: RefCell<HashMap<String, NativeProgram>>,
}

impl NativeEngine {
    pub const DIRECTIVE: &'static str = "#!native";

    pub fn new() -> Self {
        Self::with_extension("lua")
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            programs: RefCell::new(HashMap::new()),
        }
    }

    /// Register (or replace) a program.
    pub fn register<F>(&self, name: impl Into<String>, program: F)
    where
        F: Fn(&ScriptScope) -> Result<ScriptValue, ScriptError> + 'static,
    {
        self.programs
            .borrow_mut()
            .insert(name.into(), Rc::new(program));
    }

    pub fn has_program(&self, name: &str) -> bool {
        self.programs.borrow().contains_key(name)
    }

    fn directive(source: &str) -> Option<&str> {
        source
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("--"))
            .and_then(|line| line.strip_prefix(Self::DIRECTIVE))
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for NativeEngine {
    fn file_extension(&self) -> &str {
        &self.extension
    }

    fn compile(
        &self,
        source: &str,
        chunk_name: &str,
        _env: &ScriptEnvironment,
    ) -> Result<ScriptFunction, ScriptError> {
        let Some(name) = Self::directive(source) else {
            return Err(ScriptError::compile(
                chunk_name,
                format!(
                    "{}:1: expected '{} <program>' before any other statement",
                    chunk_name,
                    Self::DIRECTIVE
                ),
            ));
        };

        let program = self.programs.borrow().get(name).cloned().ok_or_else(|| {
            ScriptError::compile(
                chunk_name,
                format!("{}:1: unknown native program '{}'", chunk_name, name),
            )
        })?;

        Ok(ScriptFunction::named(chunk_name, move |scope, _args| {
            program(scope)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SharedEnvironment;
    use crate::scope::ScriptId;

    #[test]
    fn test_scan_require_forms() {
        let source = r#"
            local a = require "helpers"
            local b = require('mymod.util')
            local c = require ( 'ui/panel' )
            local d = myrequire("not_this")
            local e = require_all("nor_this")
            local f = require "helpers"
        "#;
        assert_eq!(scan_require_calls(source), vec!["helpers", "util", "panel"]);
    }

    #[test]
    fn test_scan_ignores_unquoted() {
        assert!(scan_require_calls("require(name)").is_empty());
        assert!(scan_require_calls("require \"unterminated").is_empty());
    }

    #[test]
    fn test_native_engine_runs_registered_program() {
        let engine = NativeEngine::new();
        engine.register("hello", |scope| {
            scope.env().set("greeting", ScriptValue::from("hi"));
            Ok(ScriptValue::Int(7))
        });

        let shared = SharedEnvironment::new();
        let env = ScriptEnvironment::new(shared);
        let scope = ScriptScope::new(
            Rc::new(ScriptId::from_path("hello.lua")),
            env.clone(),
            None,
        );

        let chunk = engine
            .compile("-- greeting script\n#!native hello\n", "hello.lua", &env)
            .unwrap();
        let export = engine.call(&chunk, &scope, &[]).unwrap();

        assert_eq!(export, ScriptValue::Int(7));
        assert_eq!(env.get("greeting"), Some(ScriptValue::from("hi")));
    }

    #[test]
    fn test_native_engine_compile_errors() {
        let engine = NativeEngine::new();
        let env = ScriptEnvironment::new(SharedEnvironment::new());

        let err = engine.compile("print('hi')", "x.lua", &env).unwrap_err();
        assert!(err.to_string().starts_with("x.lua:1:"));

        let err = engine.compile("#!native missing", "x.lua", &env).unwrap_err();
        assert!(err.to_string().contains("unknown native program 'missing'"));
    }
}
