//! Script-registered console commands.
//!
//! The [`CommandBridge`] sits between scripts and the host's [`CommandSink`].
//! It remembers which script owns each command so a reload or shutdown can
//! revoke exactly that script's commands, and it refuses to shadow commands
//! the host registered natively.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::diagnostics::ErrorReporter;
use crate::engine::ScriptEngine;
use crate::error::CommandError;
use crate::scope::{ScriptId, ScriptScope};
use crate::value::{ScriptFunction, ScriptValue};

/// What the sink calls when a command is run. Arguments arrive as ordered strings.
pub type CommandHandler = Rc<dyn Fn(&[String])>;

#[derive(Clone)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub handler: CommandHandler,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Who registered a name in the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    Native,
    Script,
    Absent,
}

/// The host console, as far as scripts are concerned.
///
/// `add` and `remove` only ever deal with script commands; native commands
/// are registered through whatever API the host's console offers.
pub trait CommandSink {
    fn add(&self, descriptor: CommandDescriptor);

    fn remove(&self, name: &str) -> bool;

    fn lookup(&self, name: &str) -> CommandOrigin;
}

struct ConsoleEntry {
    descriptor: CommandDescriptor,
    origin: CommandOrigin,
}

/// A minimal in-memory console: native and script commands in one table.
#[derive(Default)]
pub struct CommandConsole {
    entries: RefCell<BTreeMap<String, ConsoleEntry>>,
}

impl CommandConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_native<F>(&self, name: &str, description: &str, usage: &str, handler: F)
    where
        F: Fn(&[String]) + 'static,
    {
        self.entries.borrow_mut().insert(
            name.to_string(),
            ConsoleEntry {
                descriptor: CommandDescriptor {
                    name: name.to_string(),
                    description: description.to_string(),
                    usage: usage.to_string(),
                    handler: Rc::new(handler),
                },
                origin: CommandOrigin::Native,
            },
        );
    }

    /// Run a command. The table is not borrowed while the handler runs, so
    /// handlers may register or remove commands.
    pub fn execute(&self, name: &str, args: &[String]) -> bool {
        let handler = self
            .entries
            .borrow()
            .get(name)
            .map(|entry| entry.descriptor.handler.clone());
        match handler {
            Some(handler) => {
                handler(args);
                true
            }
            None => {
                warn!(target: "scripting", "Unknown command: {}", name);
                false
            }
        }
    }

    /// Split a console line on whitespace and run it.
    pub fn execute_line(&self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return false;
        };
        let args: Vec<String> = parts.map(str::to_string).collect();
        self.execute(name, &args)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// `(name, usage, description)` for every command, for help listings.
    pub fn help_entries(&self) -> Vec<(String, String, String)> {
        self.entries
            .borrow()
            .values()
            .map(|entry| {
                (
                    entry.descriptor.name.clone(),
                    entry.descriptor.usage.clone(),
                    entry.descriptor.description.clone(),
                )
            })
            .collect()
    }
}

impl CommandSink for CommandConsole {
    fn add(&self, descriptor: CommandDescriptor) {
        let mut entries = self.entries.borrow_mut();
        if matches!(
            entries.get(&descriptor.name),
            Some(ConsoleEntry {
                origin: CommandOrigin::Native,
                ..
            })
        ) {
            warn!(target: "scripting", "Refusing to replace native command '{}'", descriptor.name);
            return;
        }
        entries.insert(
            descriptor.name.clone(),
            ConsoleEntry {
                descriptor,
                origin: CommandOrigin::Script,
            },
        );
    }

    fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.get(name).map(|entry| entry.origin) {
            Some(CommandOrigin::Script) => entries.remove(name).is_some(),
            _ => false,
        }
    }

    fn lookup(&self, name: &str) -> CommandOrigin {
        self.entries
            .borrow()
            .get(name)
            .map(|entry| entry.origin)
            .unwrap_or(CommandOrigin::Absent)
    }
}

struct ScriptCommand {
    callback: ScriptFunction,
    owner: ScriptScope,
}

pub type SharedCommandBridge = Rc<RefCell<CommandBridge>>;

pub struct CommandBridge {
    sink: Rc<dyn CommandSink>,
    engine: Rc<dyn ScriptEngine>,
    reporter: ErrorReporter,
    commands: BTreeMap<String, ScriptCommand>,
    ready: bool,
    this: Weak<RefCell<CommandBridge>>,
}

impl CommandBridge {
    pub fn new_shared(
        sink: Rc<dyn CommandSink>,
        engine: Rc<dyn ScriptEngine>,
        reporter: ErrorReporter,
    ) -> SharedCommandBridge {
        Rc::new_cyclic(|this| {
            RefCell::new(Self {
                sink,
                engine,
                reporter,
                commands: BTreeMap::new(),
                ready: false,
                this: this.clone(),
            })
        })
    }

    /// The host signalled that its console accepts registrations.
    pub fn mark_ready(&mut self) {
        if !self.ready {
            debug!(target: "scripting", "Console ready, accepting script commands");
        }
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        usage: &str,
        callback: Option<ScriptFunction>,
        owner: &ScriptScope,
    ) -> Result<(), CommandError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyName);
        }
        let Some(callback) = callback else {
            return Err(CommandError::MissingCallback(name.to_string()));
        };
        if !self.ready {
            return Err(CommandError::NotReady(name.to_string()));
        }

        match self.sink.lookup(name) {
            CommandOrigin::Native => {
                return Err(CommandError::NativeCollision(name.to_string()));
            }
            CommandOrigin::Script if !self.commands.contains_key(name) => {
                // Left behind by something other than this bridge
                self.sink.remove(name);
            }
            _ => {}
        }

        if let Some(previous) = self.commands.remove(name) {
            warn!(
                target: "scripting",
                "Command '{}' from {} replaced by {}",
                name,
                previous.owner.id().name(),
                owner.id().name()
            );
            self.sink.remove(name);
            previous.owner.forget_command(name);
        }

        self.sink.add(CommandDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            usage: usage.to_string(),
            handler: self.handler_for(name),
        });
        owner.record_command(name);
        self.commands.insert(
            name.to_string(),
            ScriptCommand {
                callback,
                owner: owner.clone(),
            },
        );

        info!(target: "scripting", "Registered command '{}' for {}", name, owner.id().name());
        Ok(())
    }

    /// Remove a script command. Unknown names are logged and ignored.
    pub fn unregister(&mut self, name: &str) -> bool {
        match self.commands.remove(name) {
            Some(command) => {
                self.sink.remove(name);
                command.owner.forget_command(name);
                debug!(target: "scripting", "Unregistered command '{}'", name);
                true
            }
            None => {
                warn!(target: "scripting", "Cannot unregister '{}': not a script command", name);
                false
            }
        }
    }

    /// Remove every command registered while running as `owner`.
    pub fn unregister_owned_by(&mut self, owner: &ScriptScope) -> usize {
        let mut removed = 0;
        for name in owner.owned_commands() {
            let owned_here = self
                .commands
                .get(&name)
                .is_some_and(|command| command.owner.same_scope(owner));
            if owned_here && self.unregister(&name) {
                removed += 1;
            } else {
                owner.forget_command(&name);
            }
        }
        removed
    }

    /// Remove every script command, e.g. at shutdown.
    pub fn unregister_all(&mut self) -> usize {
        let names: Vec<String> = self.commands.keys().cloned().collect();
        names.iter().filter(|name| self.unregister(name)).count()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn owner_of(&self, name: &str) -> Option<&ScriptId> {
        self.commands.get(name).map(|command| command.owner.id())
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    /// Run a script command. Errors in the callback are reported and never
    /// reach the sink. The bridge is not borrowed while the callback runs.
    pub fn execute(bridge: &SharedCommandBridge, name: &str, args: &[String]) -> bool {
        let prepared = match bridge.try_borrow() {
            Ok(this) => this.commands.get(name).map(|command| {
                (
                    command.callback.clone(),
                    command.owner.clone(),
                    this.engine.clone(),
                    this.reporter.clone(),
                )
            }),
            Err(_) => {
                warn!(target: "scripting", "Command '{}' ignored: command registry is busy", name);
                return false;
            }
        };
        let Some((callback, owner, engine, reporter)) = prepared else {
            warn!(target: "scripting", "Unknown script command '{}'", name);
            return false;
        };

        let argv = ScriptValue::List(args.iter().cloned().map(ScriptValue::Str).collect());
        match engine.call(&callback, &owner, &[argv]) {
            Ok(_) => true,
            Err(err) => {
                reporter.report(&err, &format!("command '{}'", name), owner.id().path());
                false
            }
        }
    }

    fn handler_for(&self, name: &str) -> CommandHandler {
        let bridge = self.this.clone();
        let name = name.to_string();
        Rc::new(move |args: &[String]| {
            if let Some(bridge) = bridge.upgrade() {
                CommandBridge::execute(&bridge, &name, args);
            }
        })
    }
}
