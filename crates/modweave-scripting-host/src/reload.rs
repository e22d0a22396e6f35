//! Hot reload: file watching, debouncing and the hand-off to the main tick.
//!
//! The watcher and debounce threads only ever push paths onto a
//! [`ReloadQueue`]. Reloading itself happens on the thread that drains it.

use std::collections::{HashMap, VecDeque};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::WatchError;
use crate::manifest::MANIFEST_FILE;

/// Distinct paths waiting for the next tick, in arrival order.
#[derive(Clone, Default)]
pub struct ReloadQueue {
    pending: Arc<Mutex<VecDeque<PathBuf>>>,
}

impl ReloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `path` unless it is already waiting. Returns true if it was added.
    pub fn push(&self, path: PathBuf) -> bool {
        let mut pending = self.lock();
        if pending.contains(&path) {
            return false;
        }
        pending.push_back(path);
        true
    }

    /// Take everything queued so far. The lock is released before returning.
    pub fn drain(&self) -> Vec<PathBuf> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PathBuf>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sending half of the debounce channel. Usable from any thread.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<PathBuf>,
}

impl ChangeNotifier {
    /// Report that `path` changed. Returns false once the pipeline is gone.
    pub fn notify(&self, path: impl Into<PathBuf>) -> bool {
        self.tx.send(path.into()).is_ok()
    }
}

/// Watches a script tree and queues changed script files for reload.
pub struct ReloadPipeline {
    queue: ReloadQueue,
    notifier: ChangeNotifier,
    extension: String,
    watcher: Option<RecommendedWatcher>,
    root: Option<PathBuf>,
}

impl ReloadPipeline {
    /// Start the debounce thread. A path is queued once it has been quiet
    /// for `settle`.
    pub fn new(settle: Duration, extension: impl Into<String>) -> Self {
        let queue = ReloadQueue::new();
        let (tx, rx) = mpsc::channel();

        let debounce_queue = queue.clone();
        let spawned = thread::Builder::new()
            .name("script-reload-debounce".to_string())
            .spawn(move || debounce(rx, debounce_queue, settle));
        if let Err(e) = spawned {
            error!(target: "scripting", "Failed to start reload debounce thread: {}", e);
        }

        Self {
            queue,
            notifier: ChangeNotifier { tx },
            extension: extension.into(),
            watcher: None,
            root: None,
        }
    }

    /// Watch `root` recursively. Replaces any previous watch.
    pub fn watch(&mut self, root: &Path, poll_interval: Duration) -> Result<(), WatchError> {
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root.to_path_buf()));
        }
        let root = normalize_path(root);

        let notifier = self.notifier.clone();
        let extension = self.extension.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_relevant(&event.kind) {
                    return;
                }
                for path in &event.paths {
                    route_change(path, &extension, &notifier);
                }
            }
            Err(e) => warn!(target: "scripting", "Script watcher error: {}", e),
        })
        .map_err(|source| WatchError::Notify {
            path: root.clone(),
            source,
        })?;

        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(poll_interval),
            )
            .map_err(|source| WatchError::Notify {
                path: root.clone(),
                source,
            })?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: root.clone(),
                source,
            })?;

        info!(target: "scripting", "Watching {} for script changes", root.display());
        self.watcher = Some(watcher);
        self.root = Some(root);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    pub fn queue(&self) -> &ReloadQueue {
        &self.queue
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn drain(&self) -> Vec<PathBuf> {
        self.queue.drain()
    }
}

fn debounce(rx: mpsc::Receiver<PathBuf>, queue: ReloadQueue, settle: Duration) {
    let mut waiting: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_due = waiting.values().min().copied();
        let received = match next_due {
            Some(due) => rx.recv_timeout(due.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(path) => {
                waiting.insert(normalize_path(&path), Instant::now() + settle);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) if waiting.is_empty() => break,
            Err(RecvTimeoutError::Disconnected) => thread::sleep(settle),
        }

        let now = Instant::now();
        let settled: Vec<PathBuf> = waiting
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in settled {
            waiting.remove(&path);
            if queue.push(path.clone()) {
                debug!(target: "scripting", "Queued {} for reload", path.display());
            }
        }
    }

    debug!(target: "scripting", "Reload debounce thread exiting");
}

/// Forward script changes to the debouncer. Manifest edits are only reported.
pub fn route_change(path: &Path, extension: &str, notifier: &ChangeNotifier) {
    let file_name = path.file_name().and_then(|name| name.to_str());
    if file_name == Some(MANIFEST_FILE) {
        warn!(
            target: "scripting",
            "Manifest {} changed; restart the host to apply bundle changes",
            path.display()
        );
        return;
    }
    if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
        notifier.notify(path);
    }
}

pub fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

/// Absolute, canonical form of `path`. Paths that do not exist yet are
/// resolved through their parent.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    if let Ok(canonical) = fs::canonicalize(&absolute) {
        return canonical;
    }
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

/// Full-reload requests raised from outside the process.
///
/// On Unix each SIGUSR2 counts as one request. The host answers a request
/// with [`crate::ScriptRuntime::request_full_reload`]; requests that pile up
/// between two waits are answered once.
pub struct ReloadSignal {
    requests: watch::Receiver<u64>,
}

impl ReloadSignal {
    /// A signal that never fires. [`ReloadSignal::requested`] returns `None` at once.
    pub fn inert() -> Self {
        let (_, requests) = watch::channel(0);
        Self { requests }
    }

    /// Wait for the next request and return how many arrived so far.
    /// `None` once the source is gone and nothing more can arrive.
    pub async fn requested(&mut self) -> Option<u64> {
        self.requests.changed().await.ok()?;
        Some(*self.requests.borrow_and_update())
    }
}

/// Listen for SIGUSR2 on the current tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal() -> ReloadSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigusr2 = match signal(SignalKind::user_defined2()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(target: "scripting", "SIGUSR2 unavailable, reload by signal disabled: {}", e);
            return ReloadSignal::inert();
        }
    };
    let (requests_tx, requests) = watch::channel(0u64);

    tokio::spawn(async move {
        while sigusr2.recv().await.is_some() {
            if requests_tx.is_closed() {
                break;
            }
            info!(target: "scripting", "SIGUSR2 received, full script reload requested");
            requests_tx.send_modify(|count| *count += 1);
        }
        debug!(target: "scripting", "SIGUSR2 listener stopped");
    });

    ReloadSignal { requests }
}

#[cfg(not(unix))]
pub fn setup_reload_signal() -> ReloadSignal {
    warn!(target: "scripting", "Reload by signal is only available on Unix");
    ReloadSignal::inert()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wait_for(queue: &ReloadQueue, len: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if queue.len() >= len {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_queue_dedups() {
        let queue = ReloadQueue::new();
        assert!(queue.push(PathBuf::from("/s/a.lua")));
        assert!(!queue.push(PathBuf::from("/s/a.lua")));
        assert!(queue.push(PathBuf::from("/s/b.lua")));

        assert_eq!(
            queue.drain(),
            vec![PathBuf::from("/s/a.lua"), PathBuf::from("/s/b.lua")]
        );
        assert!(queue.is_empty());
        assert!(queue.push(PathBuf::from("/s/a.lua")), "drained paths can be queued again");
    }

    #[test]
    fn test_debounce_collapses_bursts() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("burst.lua");
        fs::write(&script, "").unwrap();

        let pipeline = ReloadPipeline::new(Duration::from_millis(50), "lua");
        let notifier = pipeline.notifier();
        for _ in 0..3 {
            assert!(notifier.notify(&script));
        }

        assert!(wait_for(pipeline.queue(), 1), "path never reached the queue");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pipeline.drain(), vec![normalize_path(&script)]);
    }

    #[test]
    fn test_route_change_filters() {
        let temp = TempDir::new().unwrap();
        let pipeline = ReloadPipeline::new(Duration::ZERO, "lua");
        let notifier = pipeline.notifier();

        route_change(&temp.path().join("mod.json"), "lua", &notifier);
        route_change(&temp.path().join("notes.txt"), "lua", &notifier);
        route_change(&temp.path().join("main.lua"), "lua", &notifier);

        assert!(wait_for(pipeline.queue(), 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pipeline.drain(), vec![normalize_path(&temp.path().join("main.lua"))]);
    }

    #[test]
    fn test_relevant_events() {
        use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Read)));
        assert!(!is_relevant(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn test_watch_missing_root() {
        let temp = TempDir::new().unwrap();
        let mut pipeline = ReloadPipeline::new(Duration::ZERO, "lua");
        let result = pipeline.watch(&temp.path().join("nope"), Duration::from_millis(100));
        assert!(matches!(result, Err(WatchError::MissingRoot(_))));
        assert!(!pipeline.is_watching());
    }

    #[tokio::test]
    async fn test_inert_signal_never_requests() {
        let mut signal = ReloadSignal::inert();
        assert_eq!(signal.requested().await, None);
    }

    #[test]
    fn test_normalize_nonexistent_file() {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        assert_eq!(normalize_path(&temp.path().join("new.lua")), root.join("new.lua"));
    }
}
