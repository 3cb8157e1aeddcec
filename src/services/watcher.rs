//! Filesystem watching for the plugin directory and the persisted records.
//!
//! Raw `notify` events are classified into [`WatchEvent`]s, debounced, and
//! handed to [`LoadOrderEngine::on_watch_event`], which decides whether they
//! amount to a [`PluginChange`](crate::state::PluginChange) and broadcasts it.

use crate::models::plugin::{is_plugin_filename, plugin_key};
use crate::models::{LOAD_ORDER_FILE_NAME, PLUGINS_FILE_NAME};
use crate::services::load_order::LoadOrderEngine;
use camino::{Utf8Path, Utf8PathBuf};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Which persisted record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `plugins.txt`
    ActivePlugins,
    /// `loadorder.txt`
    LoadOrder,
}

impl RecordKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(PLUGINS_FILE_NAME) {
            Some(RecordKind::ActivePlugins)
        } else if name.eq_ignore_ascii_case(LOAD_ORDER_FILE_NAME) {
            Some(RecordKind::LoadOrder)
        } else {
            None
        }
    }
}

/// A filesystem event relevant to load order bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    RecordChanged(RecordKind),
    PluginModified(Utf8PathBuf),
    PluginCreated(Utf8PathBuf),
    PluginRemoved(Utf8PathBuf),
}

impl WatchEvent {
    /// Events sharing a key collapse into one within the debounce window.
    ///
    /// Modifications of any plugin share a key: a tool restamping fifty
    /// plugins is one load order change.
    fn debounce_key(&self) -> String {
        match self {
            WatchEvent::RecordChanged(RecordKind::ActivePlugins) => "record:plugins".to_string(),
            WatchEvent::RecordChanged(RecordKind::LoadOrder) => "record:loadorder".to_string(),
            WatchEvent::PluginModified(_) => "plugin:modified".to_string(),
            WatchEvent::PluginCreated(path) => format!("plugin:created:{}", plugin_key(path)),
            WatchEvent::PluginRemoved(path) => format!("plugin:removed:{}", plugin_key(path)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Created,
    Modified,
    Removed,
}

fn classify_path(path: &Utf8Path, action: Action) -> Option<WatchEvent> {
    let name = path.file_name()?;

    if let Some(kind) = RecordKind::from_file_name(name) {
        return Some(WatchEvent::RecordChanged(kind));
    }

    if !is_plugin_filename(name) {
        return None;
    }
    match action {
        Action::Created => Some(WatchEvent::PluginCreated(path.to_path_buf())),
        Action::Modified => Some(WatchEvent::PluginModified(path.to_path_buf())),
        Action::Removed => Some(WatchEvent::PluginRemoved(path.to_path_buf())),
    }
}

/// Translate one `notify` event into the watch events it implies.
///
/// Renames count as removal of the source name and creation of the target
/// name. Removing a record counts as a change to it.
pub fn classify(event: &Event) -> Vec<WatchEvent> {
    let all = event.paths.as_slice();
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        let from = all
            .first()
            .and_then(|p| Utf8Path::from_path(p))
            .and_then(|p| classify_path(p, Action::Removed));
        let to = all
            .last()
            .and_then(|p| Utf8Path::from_path(p))
            .and_then(|p| classify_path(p, Action::Created));
        return from.into_iter().chain(to).collect();
    }

    let (action, paths) = match event.kind {
        EventKind::Create(_) => (Action::Created, all),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => (Action::Removed, all),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => (Action::Created, all),
        EventKind::Modify(_) | EventKind::Any => (Action::Modified, all),
        EventKind::Remove(_) => (Action::Removed, all),
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    paths
        .iter()
        .filter_map(|path| Utf8Path::from_path(path))
        .filter_map(|path| classify_path(path, action))
        .collect()
}

/// Leading-edge debounce: the first event for a key passes, repeats within
/// the window are dropped.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emit: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: HashMap::new(),
        }
    }

    pub fn should_emit(&mut self, event: &WatchEvent, now: Instant) -> bool {
        let window = self.window;
        self.last_emit
            .retain(|_, last| now.saturating_duration_since(*last) < window);

        let key = event.debounce_key();
        if self.last_emit.contains_key(&key) {
            return false;
        }
        self.last_emit.insert(key, now);
        true
    }
}

/// Watches a game's plugin directory and local data folder for as long as it lives.
pub struct PluginWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl PluginWatcher {
    /// Start watching the engine's folders.
    ///
    /// Events are processed on a dedicated thread. The local data folder is
    /// created if it does not exist yet.
    ///
    /// # Errors
    /// Fails if either folder cannot be watched.
    pub fn start(engine: Arc<LoadOrderEngine>, debounce: Duration) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;

        let paths = engine.paths().clone();
        std::fs::create_dir_all(&paths.local_data_dir).map_err(notify::Error::io)?;
        watcher.watch(paths.local_data_dir.as_std_path(), RecursiveMode::NonRecursive)?;
        if paths.plugin_dir != paths.local_data_dir {
            watcher.watch(paths.plugin_dir.as_std_path(), RecursiveMode::NonRecursive)?;
        }
        tracing::info!(
            "Watching {} and {}",
            paths.plugin_dir,
            paths.local_data_dir
        );

        let worker = thread::Builder::new()
            .name("plugin-order-watcher".to_string())
            .spawn(move || process_events(&engine, rx, debounce))
            .map_err(notify::Error::io)?;

        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        // Dropping the watcher closes the channel, which ends the worker
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Watcher thread panicked");
            }
        }
    }
}

fn process_events(
    engine: &LoadOrderEngine,
    rx: Receiver<notify::Result<Event>>,
    debounce: Duration,
) {
    let mut debouncer = Debouncer::new(debounce);

    for result in rx {
        match result {
            Ok(event) => {
                for watch_event in classify(&event) {
                    if !debouncer.should_emit(&watch_event, Instant::now()) {
                        tracing::trace!("Debounced {:?}", watch_event);
                        continue;
                    }
                    if let Some(change) = engine.on_watch_event(&watch_event) {
                        tracing::info!("Detected {:?}", change);
                    }
                }
            }
            Err(e) => tracing::warn!("Watch error: {}", e),
        }
    }

    tracing::debug!("Watcher thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_classify_records() {
        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/local/Plugins.txt", "/local/loadorder.txt", "/local/other.txt"],
        );
        assert_eq!(
            classify(&modified),
            vec![
                WatchEvent::RecordChanged(RecordKind::ActivePlugins),
                WatchEvent::RecordChanged(RecordKind::LoadOrder),
            ]
        );

        let removed = event(EventKind::Remove(RemoveKind::File), &["/local/plugins.txt"]);
        assert_eq!(
            classify(&removed),
            vec![WatchEvent::RecordChanged(RecordKind::ActivePlugins)]
        );
    }

    #[test]
    fn test_classify_plugins() {
        let created = event(EventKind::Create(CreateKind::File), &["/data/New.esp", "/data/a.bsa"]);
        assert_eq!(
            classify(&created),
            vec![WatchEvent::PluginCreated(Utf8PathBuf::from("/data/New.esp"))]
        );

        let touched = event(EventKind::Modify(ModifyKind::Any), &["/data/Old.esm"]);
        assert_eq!(
            classify(&touched),
            vec![WatchEvent::PluginModified(Utf8PathBuf::from("/data/Old.esm"))]
        );

        let removed = event(EventKind::Remove(RemoveKind::File), &["/data/Old.esm"]);
        assert_eq!(
            classify(&removed),
            vec![WatchEvent::PluginRemoved(Utf8PathBuf::from("/data/Old.esm"))]
        );
    }

    #[test]
    fn test_classify_rename() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/data/Mod.esp.tmp", "/data/Mod.esp"],
        );
        assert_eq!(
            classify(&renamed),
            vec![WatchEvent::PluginCreated(Utf8PathBuf::from("/data/Mod.esp"))]
        );

        let swapped = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/data/Old.esp", "/data/New.esp"],
        );
        assert_eq!(
            classify(&swapped),
            vec![
                WatchEvent::PluginRemoved(Utf8PathBuf::from("/data/Old.esp")),
                WatchEvent::PluginCreated(Utf8PathBuf::from("/data/New.esp")),
            ]
        );

        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/data/Mod.esp"],
        );
        assert_eq!(
            classify(&from),
            vec![WatchEvent::PluginRemoved(Utf8PathBuf::from("/data/Mod.esp"))]
        );
    }

    #[test]
    fn test_debouncer() {
        let mut debouncer = Debouncer::new(Duration::from_millis(250));
        let start = Instant::now();
        let record = WatchEvent::RecordChanged(RecordKind::ActivePlugins);

        assert!(debouncer.should_emit(&record, start));
        assert!(!debouncer.should_emit(&record, start + Duration::from_millis(100)));
        assert!(debouncer.should_emit(&record, start + Duration::from_millis(300)));
    }

    #[test]
    fn test_debounce_keys() {
        let mut debouncer = Debouncer::new(Duration::from_secs(10));
        let now = Instant::now();

        assert!(debouncer.should_emit(&WatchEvent::PluginModified("/data/A.esp".into()), now));
        assert!(!debouncer.should_emit(&WatchEvent::PluginModified("/data/B.esp".into()), now));
        assert!(debouncer.should_emit(&WatchEvent::PluginCreated("/data/A.esp".into()), now));
        assert!(debouncer.should_emit(&WatchEvent::PluginCreated("/data/B.esp".into()), now));
        assert!(!debouncer.should_emit(&WatchEvent::PluginCreated("/data/b.ESP".into()), now));
        assert!(debouncer.should_emit(&WatchEvent::PluginRemoved("/data/A.esp".into()), now));
    }

    #[test]
    fn test_debouncer_forgets_expired_keys() {
        let mut debouncer = Debouncer::new(Duration::from_millis(250));
        let start = Instant::now();

        for i in 0..50 {
            let created = WatchEvent::PluginCreated(format!("/data/Mod{i}.esp").into());
            assert!(debouncer.should_emit(&created, start));
        }
        assert_eq!(debouncer.last_emit.len(), 50);

        let record = WatchEvent::RecordChanged(RecordKind::LoadOrder);
        assert!(debouncer.should_emit(&record, start + Duration::from_secs(1)));
        assert_eq!(debouncer.last_emit.len(), 1);
    }
}
