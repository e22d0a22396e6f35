use std::rc::Rc;

use tracing::warn;

use crate::commands::{CommandBridge, CommandSink, SharedCommandBridge};
use crate::diagnostics::ErrorReporter;
use crate::engine::ScriptEngine;
use crate::environment::SharedEnvironment;
use crate::scope::ExportRegistry;

/// Everything a script unit needs from the embedding program.
///
/// Cloning is cheap; all clones refer to the same engine, namespace and
/// command bridge.
#[derive(Clone)]
pub struct ScriptHost {
    engine: Rc<dyn ScriptEngine>,
    globals: SharedEnvironment,
    commands: SharedCommandBridge,
    reporter: ErrorReporter,
    exports: ExportRegistry,
}

impl ScriptHost {
    pub fn new(engine: Rc<dyn ScriptEngine>, sink: Rc<dyn CommandSink>) -> Self {
        let globals = SharedEnvironment::new();
        let reporter = ErrorReporter::new(globals.clone());
        let commands = CommandBridge::new_shared(sink, engine.clone(), reporter.clone());
        Self {
            engine,
            globals,
            commands,
            reporter,
            exports: ExportRegistry::default(),
        }
    }

    pub fn engine(&self) -> &Rc<dyn ScriptEngine> {
        &self.engine
    }

    pub fn globals(&self) -> &SharedEnvironment {
        &self.globals
    }

    pub fn commands(&self) -> &SharedCommandBridge {
        &self.commands
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn exports(&self) -> &ExportRegistry {
        &self.exports
    }

    pub fn extension(&self) -> &str {
        self.engine.file_extension()
    }

    /// Run `f` against the command bridge, or return `None` if a script
    /// callback already holds it.
    pub fn with_commands<R>(&self, f: impl FnOnce(&mut CommandBridge) -> R) -> Option<R> {
        match self.commands.try_borrow_mut() {
            Ok(mut bridge) => Some(f(&mut bridge)),
            Err(_) => {
                warn!(target: "scripting", "Command bridge is busy; skipping command bookkeeping");
                None
            }
        }
    }
}
