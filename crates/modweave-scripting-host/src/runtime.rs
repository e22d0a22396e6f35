use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use modweave_config::ScriptingConfig;
use tracing::{debug, info, warn};

use crate::api::install_host_api;
use crate::commands::{CommandSink, SharedCommandBridge};
use crate::engine::ScriptEngine;
use crate::environment::SharedEnvironment;
use crate::error::WatchError;
use crate::events::HostEvent;
use crate::host::ScriptHost;
use crate::manager::BundleManager;
use crate::manifest::MANIFEST_FILE;
use crate::reload::{normalize_path, ChangeNotifier, ReloadPipeline};
use crate::unit::{ScriptUnit, UnitState};
use crate::value::ScriptValue;

/// Default tick rate for `Update` hooks (50ms = 20Hz)
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Owns every loaded script and drives them from the host's main loop.
///
/// Not `Send`: create it on the thread that ticks it. Only the reload queue
/// inside the pipeline is shared with other threads.
pub struct ScriptRuntime {
    host: ScriptHost,
    manager: BundleManager,
    /// Scripts outside any bundle
    standalone: Vec<ScriptUnit>,
    pipeline: Option<ReloadPipeline>,
    root: Option<PathBuf>,
    last_tick: Instant,
    tick_interval: Duration,
    shut_down: bool,
}

impl ScriptRuntime {
    /// Create a runtime with the default tick rate (20Hz)
    pub fn new(engine: Rc<dyn ScriptEngine>, sink: Rc<dyn CommandSink>) -> Self {
        Self::new_with_tick_rate(engine, sink, DEFAULT_TICK_INTERVAL)
    }

    pub fn new_with_tick_rate(
        engine: Rc<dyn ScriptEngine>,
        sink: Rc<dyn CommandSink>,
        tick_interval: Duration,
    ) -> Self {
        let host = ScriptHost::new(engine, sink);
        install_host_api(&host);
        Self {
            manager: BundleManager::new(host.clone()),
            host,
            standalone: Vec::new(),
            pipeline: None,
            root: None,
            last_tick: Instant::now(),
            tick_interval,
            shut_down: false,
        }
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn globals(&self) -> &SharedEnvironment {
        self.host.globals()
    }

    pub fn commands(&self) -> &SharedCommandBridge {
        self.host.commands()
    }

    pub fn manager(&self) -> &BundleManager {
        &self.manager
    }

    pub fn set_disabled_bundles<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manager.set_disabled(ids);
    }

    /// Load bundles under `root`, then every standalone script the bundles
    /// do not own. Returns the number of scripts now known.
    pub fn load_scripts(&mut self, root: &Path) -> usize {
        if !root.is_dir() {
            warn!(target: "scripting", "Script directory {} does not exist; running without scripts", root.display());
            return self.script_count();
        }
        let root = normalize_path(root);
        info!(target: "scripting", "Loading scripts from {}", root.display());

        self.manager.discover_and_load(&root);
        for path in self.collect_standalone(&root) {
            self.load_standalone(&path);
        }
        self.root = Some(root);

        let count = self.script_count();
        info!(
            target: "scripting",
            "{} script(s) loaded ({} bundle(s), {} standalone)",
            count,
            self.manager.len(),
            self.standalone.len()
        );
        count
    }

    /// Script files in `dir` and its manifest-less subfolders that no bundle claims.
    pub fn collect_standalone(&self, dir: &Path) -> Vec<PathBuf> {
        let extension = self.host.extension();
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(target: "scripting", "Failed to read {}: {}", dir.display(), e);
                    continue;
                }
            };
            for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
                if path.is_dir() {
                    if !path.join(MANIFEST_FILE).is_file() {
                        pending.push(path);
                    }
                } else if path.extension().and_then(|ext| ext.to_str()) == Some(extension)
                    && !self.manager.is_script_path_processed(&path)
                {
                    found.push(path);
                }
            }
        }

        found.sort();
        found
    }

    /// Load and initialize one script outside any bundle. A path that is
    /// already known is reloaded instead.
    pub fn load_standalone(&mut self, path: &Path) -> bool {
        if let Some(unit) = self.standalone.iter_mut().find(|unit| unit.path() == path) {
            return unit.reload();
        }

        let mut unit = ScriptUnit::new(path, self.host.clone(), None);
        unit.keep_initialized();
        let ok = unit.load() && unit.initialize();
        // Kept even when broken so a later edit can bring it back
        self.standalone.push(unit);
        ok
    }

    /// Watch the loaded script directory and reload changed files on tick.
    pub fn enable_hot_reload(&mut self, settle: Duration, poll: Duration) -> Result<(), WatchError> {
        let Some(root) = self.root.clone() else {
            return Err(WatchError::MissingRoot(PathBuf::new()));
        };
        let mut pipeline = ReloadPipeline::new(settle, self.host.extension());
        pipeline.watch(&root, poll)?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// Use `pipeline` as the reload source, watching or not.
    pub fn attach_pipeline(&mut self, pipeline: ReloadPipeline) {
        self.pipeline = Some(pipeline);
    }

    pub fn change_notifier(&self) -> Option<ChangeNotifier> {
        self.pipeline.as_ref().map(ReloadPipeline::notifier)
    }

    /// One pass of the host loop: apply queued reloads, then run `Update`
    /// hooks if a tick interval has passed since the last run.
    pub fn tick(&mut self, now: Instant) {
        self.process_reloads();

        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < self.tick_interval {
            return;
        }
        self.last_tick = now;

        let delta = elapsed.as_secs_f64();
        self.manager.update_all(delta);
        for unit in &mut self.standalone {
            unit.update(delta);
        }
    }

    /// Drain the reload queue and reload each path. Returns how many reloads succeeded.
    pub fn process_reloads(&mut self) -> usize {
        let paths = match &self.pipeline {
            Some(pipeline) => pipeline.drain(),
            None => return 0,
        };
        paths.iter().filter(|path| self.reload_path(path)).count()
    }

    /// Reload whatever script lives at `path`, or load it as a new standalone script.
    pub fn reload_path(&mut self, path: &Path) -> bool {
        if let Some(result) = self.manager.reload_script(path) {
            return result;
        }
        if self.standalone.iter().any(|unit| unit.path() == path) {
            return self.load_standalone(path);
        }
        if let Some(bundle) = self.manager.bundle_for_path(path) {
            warn!(
                target: "scripting",
                "{} is not listed in the manifest of '{}'; restart to pick it up",
                path.display(),
                bundle.id()
            );
            return false;
        }
        if !path.is_file() {
            debug!(target: "scripting", "Ignoring change to missing file {}", path.display());
            return false;
        }
        info!(target: "scripting", "New script {}", path.display());
        self.load_standalone(path)
    }

    /// Reload every script. Returns how many reloads succeeded.
    pub fn request_full_reload(&mut self) -> usize {
        info!(target: "scripting", "Reloading all scripts");
        let mut reloaded = self.manager.reload_all();
        for unit in &mut self.standalone {
            if unit.reload() {
                reloaded += 1;
            }
        }
        reloaded
    }

    /// Deliver a host event to every bundle, then every standalone script.
    /// Returns how many handlers ran successfully.
    pub fn trigger_event(&mut self, event: HostEvent, args: &[ScriptValue]) -> usize {
        if event == HostEvent::ConsoleReady {
            self.host.with_commands(|bridge| bridge.mark_ready());
        }

        let mut handled = self.manager.trigger_event(event, args);
        for unit in &mut self.standalone {
            if unit.trigger_event(event, args) {
                handled += 1;
            }
        }
        debug!(target: "scripting", "{} delivered to {} handler(s)", event, handled);
        handled
    }

    /// Like [`ScriptRuntime::trigger_event`], by handler name (`"OnDayChanged"`).
    pub fn trigger(&mut self, name: &str, args: &[ScriptValue]) -> Option<usize> {
        match HostEvent::from_handler_name(name) {
            Some(event) => Some(self.trigger_event(event, args)),
            None => {
                warn!(target: "scripting", "Unknown event '{}'", name);
                None
            }
        }
    }

    pub fn script_count(&self) -> usize {
        self.manager.script_count() + self.standalone.len()
    }

    pub fn standalone_paths(&self) -> Vec<PathBuf> {
        self.standalone
            .iter()
            .map(|unit| unit.path().to_path_buf())
            .collect()
    }

    pub fn find_unit(&self, path: &Path) -> Option<&ScriptUnit> {
        self.manager
            .find_unit(path)
            .or_else(|| self.standalone.iter().find(|unit| unit.path() == path))
    }

    pub fn unit_state(&self, path: &Path) -> Option<UnitState> {
        self.find_unit(path).map(ScriptUnit::state)
    }

    /// Stop watching and revoke every script command. Runs at most once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.pipeline = None;

        let removed = self
            .host
            .with_commands(|bridge| bridge.unregister_all())
            .unwrap_or(0);
        debug!(target: "scripting", "Script runtime shut down, {} command(s) removed", removed);
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build a runtime from configuration and load the configured script directory.
pub fn create_runtime_from_config(
    engine: Rc<dyn ScriptEngine>,
    sink: Rc<dyn CommandSink>,
    config: &ScriptingConfig,
) -> ScriptRuntime {
    debug!(target: "scripting", "Creating script runtime");
    let mut runtime = ScriptRuntime::new_with_tick_rate(engine, sink, config.tick_interval());
    runtime.set_disabled_bundles(config.disabled_bundles.iter().cloned());

    if !config.enabled {
        info!(target: "scripting", "Scripting disabled in configuration");
        return runtime;
    }

    let script_dir = config.script_dir();
    runtime.load_scripts(&script_dir);

    if config.hot_reload {
        if let Err(e) = runtime.enable_hot_reload(config.settle_delay(), config.poll_interval()) {
            warn!(target: "scripting", "Hot reload unavailable: {}", e);
        }
    }
    runtime
}
