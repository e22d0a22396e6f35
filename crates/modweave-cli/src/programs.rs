//! Built-in programs for the demo host.
//!
//! A script file selects one of these with `#!native <name>`. They talk to
//! the host only through the global API, the same way guest code would.

use std::cell::Cell;
use std::rc::Rc;

use modweave_scripting_host::{api, NativeEngine, ScriptError, ScriptFunction, ScriptScope, ScriptValue};

/// Call a global function by name, failing like a guest runtime would if it is missing.
fn call_global(scope: &ScriptScope, name: &str, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    match scope.env().get(name) {
        Some(ScriptValue::Function(function)) => function.call(scope, args),
        _ => Err(ScriptError::runtime(format!(
            "{}: attempt to call a nil value (global '{}')",
            scope.id().chunk_name(),
            name
        ))),
    }
}

fn log(scope: &ScriptScope, message: impl Into<String>) -> Result<(), ScriptError> {
    call_global(scope, api::LOG, &[ScriptValue::Str(message.into())]).map(|_| ())
}

fn register_command<F>(
    scope: &ScriptScope,
    name: &str,
    description: &str,
    usage: &str,
    body: F,
) -> Result<ScriptValue, ScriptError>
where
    F: Fn(&ScriptScope, &[ScriptValue]) -> Result<ScriptValue, ScriptError> + 'static,
{
    call_global(
        scope,
        api::REGISTER_COMMAND,
        &[
            name.into(),
            description.into(),
            usage.into(),
            ScriptFunction::named(name, body).into(),
        ],
    )
}

fn argv(args: &[ScriptValue]) -> Vec<String> {
    args.first()
        .and_then(ScriptValue::as_list)
        .map(|items| items.iter().map(ToString::to_string).collect())
        .unwrap_or_default()
}

pub fn register_builtin_programs(engine: &NativeEngine) {
    // Greets the player and offers a `hello` command
    engine.register("greeter", |scope| {
        scope.define_function("OnConsoleReady", |scope, _| {
            register_command(scope, "hello", "Say hello", "hello [name]", |scope, args| {
                let name = argv(args).join(" ");
                let name = if name.is_empty() { "traveller".to_string() } else { name };
                log(scope, format!("Hello, {}!", name))?;
                Ok(ScriptValue::Nil)
            })
        });
        scope.define_function("OnPlayerReady", |scope, _| {
            log(scope, "The player has arrived")?;
            Ok(ScriptValue::Nil)
        });
        call_global(scope, api::EXPORT_VALUE, &["greeting".into(), "Hello".into()])?;
        Ok(ScriptValue::Nil)
    });

    // Counts updates and reports them on demand
    engine.register("ticker", |scope| {
        let ticks = Rc::new(Cell::new(0u64));
        let counter = ticks.clone();
        scope.define_function("Update", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(ScriptValue::Nil)
        });
        scope.define_function("OnConsoleReady", move |scope, _| {
            let ticks = ticks.clone();
            register_command(scope, "ticks", "Show how many updates ran", "ticks", move |scope, _| {
                log(scope, format!("{} update(s) since load", ticks.get()))?;
                Ok(ScriptValue::Nil)
            })
        });
        Ok(ScriptValue::Nil)
    });

    // Announces the in-game clock
    engine.register("clock", |scope| {
        scope.define_function("OnTimeChanged", |scope, args| {
            if let Some(hour) = args.first() {
                log(scope, format!("It is now {}:00", hour))?;
            }
            Ok(ScriptValue::Nil)
        });
        scope.define_function("OnDayChanged", |scope, args| {
            let day = args.first().cloned().unwrap_or_default();
            log(scope, format!("Day {} begins", day))?;
            Ok(ScriptValue::Nil)
        });
        Ok(ScriptValue::Nil)
    });

    // Reads the greeting another bundle exports
    engine.register("visitor", |scope| {
        scope.define_function("OnPlayerReady", |scope, _| {
            let greeting = call_global(scope, api::GET_MOD_EXPORT, &["greeter".into(), "greeting".into()])?;
            log(scope, format!("The greeter says: {}", greeting))?;
            Ok(ScriptValue::Nil)
        });
        Ok(ScriptValue::Nil)
    });
}
