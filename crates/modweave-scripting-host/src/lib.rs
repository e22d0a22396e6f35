//! Host runtime for script bundles ("mods")
//!
//! Discovers bundles under a script directory, loads them in dependency
//! order, gives every script file its own environment over the host's shared
//! namespace, drives `Initialize`/`Update`/event hooks from the host's main
//! loop, and hot reloads changed files. The guest language itself lives
//! behind [`ScriptEngine`].

pub mod api;
pub mod bundle;
pub mod commands;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod host;
pub mod manager;
pub mod manifest;
pub mod reload;
pub mod runtime;
pub mod scope;
pub mod unit;
pub mod value;

// Re-export commonly used types for embedding hosts
pub use bundle::{Bundle, BundleState};
pub use commands::{
    CommandBridge, CommandConsole, CommandDescriptor, CommandOrigin, CommandSink,
    SharedCommandBridge,
};
pub use diagnostics::{Diagnostic, ErrorReporter};
pub use engine::{NativeEngine, ScriptEngine};
pub use environment::{ScriptEnvironment, SharedEnvironment};
pub use error::{BundleError, CommandError, ManifestError, ScriptError, StackFrame, WatchError};
pub use events::HostEvent;
pub use host::ScriptHost;
pub use manager::BundleManager;
pub use manifest::{Manifest, HOST_API_VERSION, MANIFEST_FILE};
pub use reload::{setup_reload_signal, ChangeNotifier, ReloadPipeline, ReloadQueue, ReloadSignal};
pub use runtime::{create_runtime_from_config, ScriptRuntime};
pub use scope::{ScriptId, ScriptScope};
pub use unit::{FailureStage, ScriptUnit, UnitState};
pub use value::{ScriptFunction, ScriptValue};
