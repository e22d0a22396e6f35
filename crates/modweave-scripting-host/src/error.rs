use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One frame of a guest call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub source: String,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl StackFrame {
    pub fn new(source: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            source: source.into(),
            line,
            function: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        match &self.function {
            Some(function) => write!(f, " in function '{}'", function),
            None => write!(f, " in main chunk"),
        }
    }
}

/// Errors raised while reading, compiling or running guest code.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("failed to read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("{message}")]
    Compile { chunk: String, message: String },

    #[error("{message}")]
    Runtime {
        message: String,
        traceback: Vec<StackFrame>,
    },
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn compile(chunk: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Compile {
            chunk: chunk.into(),
            message: message.into(),
        }
    }

    /// Append a frame to a runtime error's traceback. Other kinds are returned unchanged.
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        if let ScriptError::Runtime { traceback, .. } = &mut self {
            traceback.push(frame);
        }
        self
    }

    pub fn traceback(&self) -> &[StackFrame] {
        match self {
            ScriptError::Runtime { traceback, .. } => traceback,
            _ => &[],
        }
    }
}

/// Reasons a script command registration is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command name must not be empty")]
    EmptyName,

    #[error("command '{0}' was registered without a callback")]
    MissingCallback(String),

    #[error("cannot register '{0}': the console is not ready yet")]
    NotReady(String),

    #[error("'{0}' is a built-in command and cannot be overridden by a script")]
    NativeCollision(String),

    #[error("command '{0}' is not registered")]
    NotFound(String),

    #[error("command '{name}' belongs to {owner}")]
    NotOwner { name: String, owner: String },
}

#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    #[error("no manifest found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum BundleError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("entry file {} does not exist", .0.display())]
    MissingEntry(PathBuf),

    #[error("entry script {} failed to load", .0.display())]
    EntryFailed(PathBuf),

    #[error("bundle '{bundle}' requires host API {required}, this host provides {provided}")]
    IncompatibleApi {
        bundle: String,
        required: String,
        provided: String,
    },

    #[error("bundle '{bundle}' depends on '{dependency}', which was not found")]
    MissingDependency { bundle: String, dependency: String },

    #[error("bundle '{bundle}' depends on '{dependency}', which failed to load")]
    DependencyFailed { bundle: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("bundle '{0}' is disabled in the configuration")]
    Disabled(String),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root {} does not exist", .0.display())]
    MissingRoot(PathBuf),

    #[error("failed to watch {}: {source}", .path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
