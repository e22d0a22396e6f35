//! Host functions every script can call.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{error, info, warn};

use crate::commands::CommandBridge;
use crate::environment::SharedEnvironment;
use crate::error::{CommandError, ScriptError};
use crate::host::ScriptHost;
use crate::scope::{ExportRegistry, ScriptScope};
use crate::value::{ScriptFunction, ScriptValue};

pub const REGISTER_COMMAND: &str = "RegisterCommand";
pub const UNREGISTER_COMMAND: &str = "UnregisterCommand";
pub const IS_COMMAND_REGISTERED: &str = "IsCommandRegistered";
pub const EXPORT_VALUE: &str = "ExportValue";
pub const GET_MOD_EXPORT: &str = "GetModExport";
pub const LOG: &str = "Log";
pub const LOG_WARNING: &str = "LogWarning";
pub const LOG_ERROR: &str = "LogError";

/// Bind the host API into the shared namespace.
pub fn install_host_api(host: &ScriptHost) {
    let globals = host.globals();
    let bridge = Rc::downgrade(host.commands());

    define(globals, REGISTER_COMMAND, {
        let bridge = bridge.clone();
        move |scope, args| register_command(&bridge, scope, args)
    });
    define(globals, UNREGISTER_COMMAND, {
        let bridge = bridge.clone();
        move |scope, args| unregister_command(&bridge, scope, args)
    });
    define(globals, IS_COMMAND_REGISTERED, {
        let bridge = bridge.clone();
        move |_, args| {
            let name = string_arg(args, 0, IS_COMMAND_REGISTERED)?;
            Ok(ScriptValue::Bool(is_registered(&bridge, name)))
        }
    });
    define(globals, EXPORT_VALUE, export_value);
    define(globals, GET_MOD_EXPORT, {
        let exports = host.exports().clone();
        move |_, args| get_mod_export(&exports, args)
    });
    define(globals, LOG, |scope, args| {
        info!(target: "script", "[{}] {}", scope.id().name(), join_args(args));
        Ok(ScriptValue::Nil)
    });
    define(globals, LOG_WARNING, |scope, args| {
        warn!(target: "script", "[{}] {}", scope.id().name(), join_args(args));
        Ok(ScriptValue::Nil)
    });
    define(globals, LOG_ERROR, |scope, args| {
        error!(target: "script", "[{}] {}", scope.id().name(), join_args(args));
        Ok(ScriptValue::Nil)
    });
}

fn define<F>(globals: &SharedEnvironment, name: &str, body: F)
where
    F: Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError> + 'static,
{
    globals.set(name, ScriptValue::Function(ScriptFunction::named(name, body)));
}

// RegisterCommand(name, description, usage, callback) -> bool
fn register_command(
    bridge: &Weak<RefCell<CommandBridge>>,
    scope: &ScriptScope,
    args: &[ScriptValue],
) -> Result<ScriptValue, ScriptError> {
    let name = string_arg(args, 0, REGISTER_COMMAND)?;
    let description = optional_string_arg(args, 1);
    let usage = optional_string_arg(args, 2);
    let callback = args.get(3).and_then(ScriptValue::as_function).cloned();

    let Some(bridge) = bridge.upgrade() else {
        return Ok(ScriptValue::Bool(false));
    };
    let result = match bridge.try_borrow_mut() {
        Ok(mut bridge) => bridge.register(name, &description, &usage, callback, scope),
        Err(_) => Err(CommandError::NotReady(name.to_string())),
    };

    match result {
        Ok(()) => Ok(ScriptValue::Bool(true)),
        Err(e) => {
            error!(target: "scripting", "{}: {}", scope.id().name(), e);
            Ok(ScriptValue::Bool(false))
        }
    }
}

fn is_registered(bridge: &Weak<RefCell<CommandBridge>>, name: &str) -> bool {
    let Some(bridge) = bridge.upgrade() else {
        return false;
    };
    let registered = bridge.try_borrow().is_ok_and(|b| b.is_registered(name));
    registered
}

// UnregisterCommand(name) -> bool. Scripts may only remove their own commands.
fn unregister_command(
    bridge: &Weak<RefCell<CommandBridge>>,
    scope: &ScriptScope,
    args: &[ScriptValue],
) -> Result<ScriptValue, ScriptError> {
    let name = string_arg(args, 0, UNREGISTER_COMMAND)?;
    let Some(bridge) = bridge.upgrade() else {
        return Ok(ScriptValue::Bool(false));
    };
    let Ok(mut bridge) = bridge.try_borrow_mut() else {
        return Ok(ScriptValue::Bool(false));
    };

    if let Some(owner) = bridge.owner_of(name) {
        if owner != scope.id() {
            let err = CommandError::NotOwner {
                name: name.to_string(),
                owner: owner.name().to_string(),
            };
            warn!(target: "scripting", "{}: {}", scope.id().name(), err);
            return Ok(ScriptValue::Bool(false));
        }
    }
    Ok(ScriptValue::Bool(bridge.unregister(name)))
}

// ExportValue(key, value): publish a value in the caller's bundle export table
fn export_value(scope: &ScriptScope, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    let key = string_arg(args, 0, EXPORT_VALUE)?;
    let value = args.get(1).cloned().unwrap_or_default();
    match scope.bundle() {
        Some(bundle) => {
            bundle.exports.set(key, value);
            Ok(ScriptValue::Bool(true))
        }
        None => {
            warn!(
                target: "scripting",
                "{}: ExportValue('{}') ignored, standalone scripts have no export table",
                scope.id().name(),
                key
            );
            Ok(ScriptValue::Bool(false))
        }
    }
}

// GetModExport(bundle, key) -> value or nil
fn get_mod_export(exports: &ExportRegistry, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    let bundle = string_arg(args, 0, GET_MOD_EXPORT)?;
    let key = string_arg(args, 1, GET_MOD_EXPORT)?;
    Ok(exports.get(bundle, key).unwrap_or_default())
}

fn string_arg<'a>(args: &'a [ScriptValue], index: usize, function: &str) -> Result<&'a str, ScriptError> {
    match args.get(index) {
        Some(ScriptValue::Str(s)) => Ok(s),
        other => Err(ScriptError::runtime(format!(
            "bad argument #{} to '{}' (string expected, got {})",
            index + 1,
            function,
            other.map_or("nil", ScriptValue::type_name)
        ))),
    }
}

fn optional_string_arg(args: &[ScriptValue], index: usize) -> String {
    match args.get(index) {
        Some(ScriptValue::Nil) | None => String::new(),
        Some(value) => value.to_string(),
    }
}

fn join_args(args: &[ScriptValue]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandConsole, CommandOrigin, CommandSink};
    use crate::engine::NativeEngine;
    use crate::environment::ScriptEnvironment;
    use crate::scope::{BundleScope, ExportTable, ScriptId};

    fn setup() -> (ScriptHost, Rc<CommandConsole>) {
        let console = Rc::new(CommandConsole::new());
        let host = ScriptHost::new(Rc::new(NativeEngine::new()), console.clone());
        install_host_api(&host);
        host.commands().borrow_mut().mark_ready();
        (host, console)
    }

    fn scope(host: &ScriptHost, path: &str, bundle: Option<BundleScope>) -> ScriptScope {
        ScriptScope::new(
            Rc::new(ScriptId::from_path(path)),
            ScriptEnvironment::new(host.globals().clone()),
            bundle,
        )
    }

    fn call(scope: &ScriptScope, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
        let function = scope.env().get(name).unwrap();
        function.as_function().unwrap().call(scope, args)
    }

    #[test]
    fn test_register_through_api() {
        let (host, console) = setup();
        let owner = scope(&host, "ping.lua", None);
        let callback = ScriptValue::Function(ScriptFunction::new(|_, _| Ok(ScriptValue::Nil)));

        let result = call(
            &owner,
            REGISTER_COMMAND,
            &["ping".into(), "Reply".into(), "ping".into(), callback],
        );
        assert_eq!(result.unwrap(), ScriptValue::Bool(true));
        assert_eq!(console.lookup("ping"), CommandOrigin::Script);
        assert!(owner.owns_command("ping"));
        assert_eq!(
            call(&owner, IS_COMMAND_REGISTERED, &["ping".into()]).unwrap(),
            ScriptValue::Bool(true)
        );
    }

    #[test]
    fn test_register_rejection_is_not_an_error() {
        let (host, console) = setup();
        console.add_native("help", "", "", |_| {});
        let owner = scope(&host, "x.lua", None);
        let callback = ScriptValue::Function(ScriptFunction::new(|_, _| Ok(ScriptValue::Nil)));

        let result = call(&owner, REGISTER_COMMAND, &["help".into(), ScriptValue::Nil, ScriptValue::Nil, callback]);
        assert_eq!(result.unwrap(), ScriptValue::Bool(false));

        let result = call(&owner, REGISTER_COMMAND, &["nocallback".into()]);
        assert_eq!(result.unwrap(), ScriptValue::Bool(false));
    }

    #[test]
    fn test_bad_argument_message() {
        let (host, _console) = setup();
        let owner = scope(&host, "x.lua", None);
        let err = call(&owner, REGISTER_COMMAND, &[ScriptValue::Int(3)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad argument #1 to 'RegisterCommand' (string expected, got number)"
        );
    }

    #[test]
    fn test_unregister_requires_ownership() {
        let (host, _console) = setup();
        let owner = scope(&host, "a.lua", None);
        let other = scope(&host, "b.lua", None);
        let callback = ScriptValue::Function(ScriptFunction::new(|_, _| Ok(ScriptValue::Nil)));
        call(&owner, REGISTER_COMMAND, &["mine".into(), ScriptValue::Nil, ScriptValue::Nil, callback]).unwrap();

        assert_eq!(
            call(&other, UNREGISTER_COMMAND, &["mine".into()]).unwrap(),
            ScriptValue::Bool(false)
        );
        assert_eq!(
            call(&owner, UNREGISTER_COMMAND, &["mine".into()]).unwrap(),
            ScriptValue::Bool(true)
        );
        assert!(!host.commands().borrow().is_registered("mine"));
    }

    #[test]
    fn test_exports_between_bundles() {
        let (host, _console) = setup();
        let table = ExportTable::default();
        host.exports().insert("economy", table.clone());
        let producer = scope(
            &host,
            "economy/init.lua",
            Some(BundleScope {
                id: "economy".to_string(),
                exports: table,
            }),
        );
        let consumer = scope(&host, "shop/init.lua", None);

        call(&producer, EXPORT_VALUE, &["tax".into(), ScriptValue::Float(0.2)]).unwrap();
        assert_eq!(
            call(&consumer, GET_MOD_EXPORT, &["economy".into(), "tax".into()]).unwrap(),
            ScriptValue::Float(0.2)
        );
        assert_eq!(
            call(&consumer, GET_MOD_EXPORT, &["economy".into(), "missing".into()]).unwrap(),
            ScriptValue::Nil
        );
        assert_eq!(
            call(&consumer, EXPORT_VALUE, &["x".into(), ScriptValue::Int(1)]).unwrap(),
            ScriptValue::Bool(false)
        );
    }
}
