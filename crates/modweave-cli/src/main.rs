use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use modweave_config::{ConfigLoadError, HostConfig};
use modweave_scripting_host::{
    create_runtime_from_config, setup_reload_signal, CommandConsole, HostEvent, NativeEngine,
    ScriptRuntime, ScriptValue,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

mod logging;
mod programs;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Directory holding bundles and standalone scripts
    #[arg(short, long)]
    script_dir: Option<PathBuf>,

    /// Config file to use instead of the platform default
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Milliseconds between script updates
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Do not watch the script directory for changes
    #[arg(long)]
    no_hot_reload: bool,

    /// Also write logs to the data directory
    #[arg(long)]
    log_file: bool,

    /// Real seconds per in-game hour; 0 stops the clock
    #[arg(long, default_value_t = 10)]
    hour_secs: u64,
}

/// Work queued by native console commands for the main loop.
#[derive(Debug)]
enum Action {
    Help,
    Quit,
    Reload,
    Scripts,
    Event(String, Vec<String>),
}

type ActionQueue = Rc<RefCell<Vec<Action>>>;

fn load_config(cli: &Cli) -> anyhow::Result<HostConfig> {
    let path = cli.config.clone().unwrap_or_else(HostConfig::config_path);
    let mut config = match HostConfig::load_from(&path) {
        Ok(config) => config,
        Err(ConfigLoadError::NotFound) => {
            let config = HostConfig::default();
            if let Err(e) = config.save_to(&path) {
                eprintln!("Could not write default config to {}: {}", path.display(), e);
            }
            config
        }
        Err(e) => return Err(e).with_context(|| format!("loading {}", path.display())),
    };

    if let Some(dir) = &cli.script_dir {
        config.scripting.script_dir = Some(dir.clone());
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.scripting.tick_interval_ms = tick_ms;
    }
    if cli.no_hot_reload {
        config.scripting.hot_reload = false;
    }
    if cli.log_file {
        config.log_to_file = true;
    }
    Ok(config)
}

fn install_native_commands(console: &CommandConsole, actions: &ActionQueue) {
    let queue = actions.clone();
    console.add_native("help", "List available commands", "help", move |_| {
        queue.borrow_mut().push(Action::Help)
    });
    let queue = actions.clone();
    console.add_native("quit", "Shut down the host", "quit", move |_| {
        queue.borrow_mut().push(Action::Quit)
    });
    let queue = actions.clone();
    console.add_native("reload", "Reload every script", "reload", move |_| {
        queue.borrow_mut().push(Action::Reload)
    });
    let queue = actions.clone();
    console.add_native("scripts", "List loaded bundles and scripts", "scripts", move |_| {
        queue.borrow_mut().push(Action::Scripts)
    });
    let queue = actions.clone();
    console.add_native(
        "event",
        "Fire a host event",
        "event <OnEventName> [args...]",
        move |args| match args.split_first() {
            Some((name, rest)) => queue
                .borrow_mut()
                .push(Action::Event(name.clone(), rest.to_vec())),
            None => println!("usage: event <OnEventName> [args...]"),
        },
    );
}

fn event_arg(raw: &str) -> ScriptValue {
    if let Ok(number) = raw.parse::<i64>() {
        return ScriptValue::from(number);
    }
    if let Ok(number) = raw.parse::<f64>() {
        return ScriptValue::from(number);
    }
    ScriptValue::from(raw)
}

fn print_help(console: &CommandConsole) {
    for (name, usage, description) in console.help_entries() {
        println!("  {:<28} {}", if usage.is_empty() { name } else { usage }, description);
    }
}

fn print_scripts(runtime: &ScriptRuntime) {
    for bundle in runtime.manager().bundles() {
        println!(
            "  [{}] {} v{} ({:?})",
            bundle.id(),
            bundle.manifest().name,
            bundle.manifest().version,
            bundle.state()
        );
        for unit in bundle.units() {
            println!("      {} ({})", unit.name(), unit.state());
        }
    }
    for (id, error) in runtime.manager().failures() {
        println!("  [{}] failed: {}", id, error);
    }
    for path in runtime.standalone_paths() {
        let state = runtime
            .unit_state(&path)
            .map(|state| state.to_string())
            .unwrap_or_default();
        println!("  {} ({})", path.display(), state);
    }
}

/// Run queued console actions. Returns false once the host should stop.
fn run_actions(actions: &ActionQueue, console: &CommandConsole, runtime: &mut ScriptRuntime) -> bool {
    let pending: Vec<Action> = actions.borrow_mut().drain(..).collect();
    for action in pending {
        match action {
            Action::Help => print_help(console),
            Action::Quit => return false,
            Action::Reload => {
                let reloaded = runtime.request_full_reload();
                info!("Reloaded {} script(s)", reloaded);
            }
            Action::Scripts => print_scripts(runtime),
            Action::Event(name, args) => {
                let args: Vec<ScriptValue> = args.iter().map(|arg| event_arg(arg)).collect();
                if let Some(handled) = runtime.trigger(&name, &args) {
                    info!("{} handled by {} script(s)", name, handled);
                }
            }
        }
    }
    true
}

/// In-game clock driven from real time.
struct GameClock {
    hour_length: Option<Duration>,
    next_hour: Instant,
    hour: i64,
    day: i64,
}

impl GameClock {
    fn new(hour_secs: u64, now: Instant) -> Self {
        let hour_length = (hour_secs > 0).then(|| Duration::from_secs(hour_secs));
        Self {
            hour_length,
            next_hour: now + hour_length.unwrap_or_default(),
            hour: 6,
            day: 1,
        }
    }

    fn advance(&mut self, now: Instant, runtime: &mut ScriptRuntime) {
        let Some(hour_length) = self.hour_length else {
            return;
        };
        while now >= self.next_hour {
            self.next_hour += hour_length;
            self.hour = (self.hour + 1) % 24;
            runtime.trigger_event(HostEvent::TimeChanged, &[self.hour.into()]);
            if self.hour == 0 {
                self.day += 1;
                runtime.trigger_event(HostEvent::DayChanged, &[self.day.into()]);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.debug > 0 { "debug" } else { "info" };
    let _log_guard = logging::init_logging("cli", config.log_to_file, level)?;

    info!("Starting modweave host...");

    let engine = Rc::new(NativeEngine::new());
    programs::register_builtin_programs(&engine);

    let console = Rc::new(CommandConsole::new());
    let actions: ActionQueue = Rc::new(RefCell::new(Vec::new()));
    install_native_commands(&console, &actions);

    let mut runtime = create_runtime_from_config(engine, console.clone(), &config.scripting);
    info!(
        "Loaded {} script(s) from {}",
        runtime.script_count(),
        config.scripting.script_dir().display()
    );

    runtime.trigger_event(HostEvent::ConsoleReady, &[]);
    runtime.trigger_event(HostEvent::PlayerReady, &[]);

    let mut clock = GameClock::new(cli.hour_secs, Instant::now());
    let mut ticker = tokio::time::interval(config.scripting.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut reload_signal = setup_reload_signal();
    let mut signal_open = true;

    println!("Type 'help' for a list of commands.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                runtime.tick(now);
                clock.advance(now, &mut runtime);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            console.execute_line(&line);
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        stdin_open = false;
                    }
                }
            }
            request = reload_signal.requested(), if signal_open => {
                match request {
                    Some(_) => {
                        let reloaded = runtime.request_full_reload();
                        info!("Reloaded {} script(s) on signal", reloaded);
                    }
                    None => signal_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        if !run_actions(&actions, &console, &mut runtime) {
            break;
        }
    }

    runtime.shutdown();
    info!("Shut down");
    Ok(())
}
