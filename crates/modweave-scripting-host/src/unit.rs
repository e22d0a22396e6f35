//! A single script file and its lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::engine::ScriptEngine;
use crate::environment::ScriptEnvironment;
use crate::error::ScriptError;
use crate::events::{HostEvent, INITIALIZE_HOOK, UPDATE_HOOK};
use crate::host::ScriptHost;
use crate::scope::{BundleScope, ScriptId, ScriptScope};
use crate::value::{ScriptFunction, ScriptValue};

/// Which step of the lifecycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Load,
    Initialize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Unloaded,
    Loaded,
    Initializing,
    Initialized,
    Reloading,
    /// Terminal for the current attempt. Only a reload clears it.
    Failed(FailureStage),
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Unloaded => f.write_str("unloaded"),
            UnitState::Loaded => f.write_str("loaded"),
            UnitState::Initializing => f.write_str("initializing"),
            UnitState::Initialized => f.write_str("initialized"),
            UnitState::Reloading => f.write_str("reloading"),
            UnitState::Failed(FailureStage::Load) => f.write_str("failed to load"),
            UnitState::Failed(FailureStage::Initialize) => f.write_str("failed to initialize"),
        }
    }
}

/// One loaded script file.
///
/// Every successful load starts a new generation: a fresh environment and
/// scope, freshly scanned handlers, and a re-enabled `Update` hook. Nothing
/// recorded against an earlier generation survives it.
pub struct ScriptUnit {
    id: Rc<ScriptId>,
    host: ScriptHost,
    bundle: Option<BundleScope>,
    state: UnitState,
    scope: Option<ScriptScope>,
    handlers: BTreeMap<HostEvent, ScriptFunction>,
    update_hook: Option<ScriptFunction>,
    update_disabled: bool,
    module_export: ScriptValue,
    required_modules: Vec<String>,
    /// Initialize after every successful load, not only the first.
    auto_initialize: bool,
    generation: u64,
}

impl ScriptUnit {
    pub fn new(path: impl Into<PathBuf>, host: ScriptHost, bundle: Option<BundleScope>) -> Self {
        Self {
            id: Rc::new(ScriptId::from_path(path)),
            host,
            bundle,
            state: UnitState::Unloaded,
            scope: None,
            handlers: BTreeMap::new(),
            update_hook: None,
            update_disabled: false,
            module_export: ScriptValue::Nil,
            required_modules: Vec::new(),
            auto_initialize: false,
            generation: 0,
        }
    }

    pub fn id(&self) -> &ScriptId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.id.path()
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// True while the unit has a usable environment from a successful load.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self.state,
            UnitState::Loaded
                | UnitState::Initializing
                | UnitState::Initialized
                | UnitState::Failed(FailureStage::Initialize)
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.state == UnitState::Initialized
    }

    pub fn is_update_disabled(&self) -> bool {
        self.update_disabled
    }

    pub fn has_update_hook(&self) -> bool {
        self.update_hook.is_some()
    }

    pub fn has_handler(&self, event: HostEvent) -> bool {
        self.handlers.contains_key(&event)
    }

    pub fn handled_events(&self) -> Vec<HostEvent> {
        self.handlers.keys().copied().collect()
    }

    /// Value returned by the script's top-level chunk.
    pub fn module_export(&self) -> &ScriptValue {
        &self.module_export
    }

    /// Modules the script pulls in on demand, by short name.
    pub fn required_modules(&self) -> &[String] {
        &self.required_modules
    }

    pub fn environment(&self) -> Option<&ScriptEnvironment> {
        self.scope.as_ref().map(ScriptScope::env)
    }

    pub fn scope(&self) -> Option<&ScriptScope> {
        self.scope.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark the unit as one its owner wants running. Every later successful
    /// reload initializes it, even if no earlier attempt got that far.
    pub fn keep_initialized(&mut self) {
        self.auto_initialize = true;
    }

    pub fn wants_initialize(&self) -> bool {
        self.auto_initialize
    }

    /// Read, compile and run the script body in a fresh environment.
    pub fn load(&mut self) -> bool {
        self.teardown();

        let source = match fs::read_to_string(self.path()) {
            Ok(source) => source,
            Err(e) => {
                let err = ScriptError::Io {
                    path: self.path().to_path_buf(),
                    message: e.to_string(),
                };
                return self.fail(FailureStage::Load, &err, "load");
            }
        };

        let engine = self.host.engine().clone();
        let env = ScriptEnvironment::new(self.host.globals().clone());
        let scope = ScriptScope::new(self.id.clone(), env.clone(), self.bundle.clone());

        let chunk = match engine.compile(&source, &self.id.chunk_name(), &env) {
            Ok(chunk) => chunk,
            Err(err) => return self.fail(FailureStage::Load, &err, "compile"),
        };

        let export = match engine.call(&chunk, &scope, &[]) {
            Ok(export) => export,
            Err(err) => {
                // Commands registered by the half-run body must not outlive it
                self.host
                    .with_commands(|bridge| bridge.unregister_owned_by(&scope));
                return self.fail(FailureStage::Load, &err, "load");
            }
        };

        self.handlers = HostEvent::ALL
            .into_iter()
            .filter_map(|event| {
                env.local_function(event.handler_name())
                    .map(|handler| (event, handler))
            })
            .collect();
        self.update_hook = env.local_function(UPDATE_HOOK);
        self.update_disabled = false;
        self.module_export = export;
        self.required_modules = engine.required_modules(&source);
        self.scope = Some(scope);
        self.generation += 1;
        self.state = UnitState::Loaded;

        info!(
            target: "scripting",
            "Loaded script {} ({} event handlers{})",
            self.name(),
            self.handlers.len(),
            if self.update_hook.is_some() { ", Update" } else { "" }
        );
        true
    }

    /// Run the `Initialize` hook once for this load generation.
    pub fn initialize(&mut self) -> bool {
        match self.state {
            UnitState::Initialized => return true,
            UnitState::Initializing => {
                warn!(target: "scripting", "{} is already initializing; ignoring nested call", self.name());
                return false;
            }
            UnitState::Loaded => {}
            UnitState::Failed(FailureStage::Initialize) => {
                debug!(target: "scripting", "{} failed to initialize; waiting for a reload", self.name());
                return false;
            }
            state => {
                warn!(target: "scripting", "Cannot initialize {}: script is {}", self.name(), state);
                return false;
            }
        }
        let Some(scope) = self.scope.clone() else {
            return false;
        };

        self.auto_initialize = true;
        self.state = UnitState::Initializing;
        let result = match scope.env().local_function(INITIALIZE_HOOK) {
            Some(hook) => self.host.engine().call(&hook, &scope, &[]).map(|_| ()),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state = UnitState::Initialized;
                debug!(target: "scripting", "Initialized {}", self.name());
                true
            }
            Err(err) => self.fail(FailureStage::Initialize, &err, INITIALIZE_HOOK),
        }
    }

    /// Call the `Update` hook. The first error disables it until the next successful load.
    pub fn update(&mut self, delta: f64) {
        if self.state != UnitState::Initialized || self.update_disabled {
            return;
        }
        let (Some(hook), Some(scope)) = (self.update_hook.clone(), self.scope.clone()) else {
            return;
        };

        if let Err(err) = self
            .host
            .engine()
            .call(&hook, &scope, &[ScriptValue::Float(delta)])
        {
            self.host.reporter().report(&err, UPDATE_HOOK, self.path());
            self.update_disabled = true;
            warn!(
                target: "scripting",
                "Update disabled for {} until it is reloaded",
                self.name()
            );
        }
    }

    /// Deliver an event. Returns true if a handler ran and returned normally.
    pub fn trigger_event(&mut self, event: HostEvent, args: &[ScriptValue]) -> bool {
        if self.state != UnitState::Initialized {
            return false;
        }
        let (Some(handler), Some(scope)) = (self.handlers.get(&event).cloned(), self.scope.clone())
        else {
            return false;
        };

        match self.host.engine().call(&handler, &scope, args) {
            Ok(_) => true,
            Err(err) => {
                self.host
                    .reporter()
                    .report(&err, event.handler_name(), self.path());
                false
            }
        }
    }

    /// Drop everything from the current generation and load the file again.
    ///
    /// A unit marked with [`ScriptUnit::keep_initialized`], or one that was
    /// initialized before, is initialized again and gets `OnConsoleReady`
    /// re-fired if it still handles it, so it can put its commands back. This
    /// holds even when the previous attempt failed to load or initialize. A
    /// failed load leaves the unit failed; the old code is not kept.
    pub fn reload(&mut self) -> bool {
        info!(target: "scripting", "Reloading {}", self.name());
        self.teardown();
        self.state = UnitState::Reloading;

        if !self.load() {
            return false;
        }
        if !self.auto_initialize {
            return true;
        }
        if !self.initialize() {
            return false;
        }

        let console_ready = self.host.commands().try_borrow().is_ok_and(|b| b.is_ready());
        if console_ready && self.has_handler(HostEvent::ConsoleReady) {
            self.trigger_event(HostEvent::ConsoleReady, &[]);
        }
        true
    }

    /// Revoke this generation's commands and forget its handlers.
    pub fn teardown(&mut self) {
        if let Some(scope) = self.scope.take() {
            let removed = self
                .host
                .with_commands(|bridge| bridge.unregister_owned_by(&scope))
                .unwrap_or(0);
            if removed > 0 {
                debug!(target: "scripting", "Removed {} command(s) owned by {}", removed, self.name());
            }
        }
        self.handlers.clear();
        self.update_hook = None;
        self.update_disabled = false;
        self.module_export = ScriptValue::Nil;
        self.required_modules.clear();
        self.state = UnitState::Unloaded;
    }

    fn fail(&mut self, stage: FailureStage, err: &ScriptError, context: &str) -> bool {
        self.host.reporter().report(err, context, self.path());
        self.state = UnitState::Failed(stage);
        false
    }
}

impl fmt::Debug for ScriptUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptUnit")
            .field("path", &self.id.path())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("handlers", &self.handled_events())
            .finish()
    }
}
