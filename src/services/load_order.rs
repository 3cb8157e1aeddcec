//! Load order and active plugin reconciliation.
//!
//! [`LoadOrderEngine`] answers "what is the load order" and "which plugins are
//! active" for one game install, reconciling three sources that routinely
//! disagree: the plugin files on disk, `plugins.txt`, and (for games that do
//! not order by timestamp) `loadorder.txt`.
//!
//! Reads never fail. When a record is locked past the retry budget or
//! unreadable, the engine answers from the last successfully read state and,
//! failing that, from the game's critical and official plugins. Writes never
//! fail either; they report a [`WriteOutcome`].
//!
//! # Invariants
//!
//! - Critical plugins that exist lead the load order in the game's fixed order.
//! - No plugin appears twice (identity is the case-insensitive filename).
//! - Plugins that no longer exist on disk are never returned.
//! - Active plugins are returned in load order position.

use crate::metrics::Metrics;
use crate::models::plugin::{
    has_plugin_extension, is_master_file, is_plugin_filename, name_key, plugin_key,
};
use crate::models::{DiskPlugin, GameMode, GamePaths, Settings};
use crate::services::backup::backup_records;
use crate::services::reconcile::{
    append_missing, critical_first, dedup_by_name, intersect_in_order, sort_by_load_order,
    sort_by_timestamp,
};
use crate::services::records::{
    FsRecordStore, RecordRead, RecordStore, RetryPolicy, WriteOutcome, read_record, write_record,
    write_timestamp,
};
use crate::services::sorter::{PluginSorter, SortResult, SorterError};
use crate::services::watcher::{RecordKind, WatchEvent};
use crate::state::{Channel, ChangeNotifier, PluginChange};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Spacing between consecutive plugin timestamps written by [`LoadOrderEngine::set_load_order`].
const TIMESTAMP_STEP: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum LoadOrderError {
    #[error("Unsupported game mode: {0}")]
    UnsupportedGame(String),

    #[error("Plugin {0} not found")]
    PluginNotFound(String),

    #[error("{0} is not a plugin file")]
    NotAPlugin(String),

    #[error("Cannot activate {plugin}: at most {max} plugins may be active")]
    TooManyActivePlugins { plugin: String, max: usize },

    #[error("Sorter failed: {0}")]
    Sorter(#[from] SorterError),
}

/// Tunables for [`LoadOrderEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub retry: RetryPolicy,
    pub settle_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            settle_window: Duration::from_millis(500),
        }
    }
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            retry: settings.retry_policy(),
            settle_window: settings.settle_window(),
        }
    }
}

/// Reconciliation engine for one game install.
///
/// Share it across threads behind an `Arc`; all methods take `&self`.
/// Mutations are expected to be serialised by the caller.
pub struct LoadOrderEngine {
    game: GameMode,
    paths: GamePaths,
    store: Box<dyn RecordStore>,
    retry: RetryPolicy,
    notifier: ChangeNotifier,
    metrics: Metrics,
    last_load_order: RwLock<Vec<Utf8PathBuf>>,
    last_active: RwLock<Vec<Utf8PathBuf>>,
    known_plugins: RwLock<HashSet<String>>,
    started: SystemTime,
}

impl LoadOrderEngine {
    /// Create an engine working against the real filesystem.
    ///
    /// Backs up `plugins.txt` and `loadorder.txt` (once) before anything can
    /// modify them.
    pub fn new(game: GameMode, paths: GamePaths, options: EngineOptions) -> Self {
        Self::with_store(game, paths, options, Box::new(FsRecordStore))
    }

    /// Create an engine whose record access goes through `store`.
    pub fn with_store(
        game: GameMode,
        paths: GamePaths,
        options: EngineOptions,
        store: Box<dyn RecordStore>,
    ) -> Self {
        backup_records([
            paths.plugins_file().as_path(),
            paths.load_order_file().as_path(),
        ]);

        let engine = Self {
            game,
            paths,
            store,
            retry: options.retry,
            notifier: ChangeNotifier::new(options.settle_window),
            metrics: Metrics::new(),
            last_load_order: RwLock::new(Vec::new()),
            last_active: RwLock::new(Vec::new()),
            known_plugins: RwLock::new(HashSet::new()),
            started: SystemTime::now(),
        };

        let known: HashSet<String> = engine.disk_plugins().iter().map(DiskPlugin::key).collect();
        tracing::info!(
            "Load order engine for {} ready: {} plugins in {}",
            game,
            known.len(),
            engine.paths.plugin_dir
        );
        *engine
            .known_plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner) = known;

        engine
    }

    /// Create an engine from user settings.
    ///
    /// # Errors
    /// Fails for an unsupported game mode or when the game's folders cannot be resolved.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let game = settings.game_mode()?;
        let paths = settings.game_paths(game)?;
        Ok(Self::new(game, paths, EngineOptions::from(settings)))
    }

    pub fn game(&self) -> GameMode {
        self.game
    }

    pub fn paths(&self) -> &GamePaths {
        &self.paths
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PluginChange> {
        self.notifier.subscribe()
    }

    // Disk state

    fn scan_plugin_dir(&self) -> io::Result<Vec<DiskPlugin>> {
        let mut plugins = Vec::new();
        for entry in fs::read_dir(&self.paths.plugin_dir)? {
            let entry = entry?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                tracing::debug!("Skipping non-UTF-8 path {:?}", entry.path());
                continue;
            };
            if !has_plugin_extension(&path) {
                continue;
            }

            // Follow symlinks
            let metadata = fs::metadata(&path)?;
            if !metadata.is_file() {
                continue;
            }
            plugins.push(DiskPlugin {
                path,
                modified: metadata.modified()?,
            });
        }
        Ok(plugins)
    }

    /// Plugin files currently in the plugin directory, in no particular order.
    ///
    /// An unreadable directory yields no plugins.
    ///
    /// A successful scan also forgets known plugins that are gone, so a
    /// re-created plugin is reported as added again.
    pub fn disk_plugins(&self) -> Vec<DiskPlugin> {
        match self.scan_plugin_dir() {
            Ok(plugins) => {
                self.forget_missing(&plugins);
                plugins
            }
            Err(e) => {
                tracing::warn!("Could not scan {}: {}", self.paths.plugin_dir, e);
                Vec::new()
            }
        }
    }

    fn forget_missing(&self, plugins: &[DiskPlugin]) {
        let present: HashSet<String> = plugins.iter().map(DiskPlugin::key).collect();
        self.known_plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| present.contains(key));
    }

    fn disk_index(&self) -> HashMap<String, DiskPlugin> {
        self.disk_plugins()
            .into_iter()
            .map(|plugin| (plugin.key(), plugin))
            .collect()
    }

    /// The on-disk path of a plugin, matched by filename without regard to case.
    pub fn resolve_plugin(&self, plugin: &Utf8Path) -> Option<Utf8PathBuf> {
        self.disk_index()
            .remove(&plugin_key(plugin))
            .map(|found| found.path)
    }

    /// Map names to their on-disk paths, dropping missing plugins and duplicates.
    fn resolve_existing<'a>(
        disk: &HashMap<String, DiskPlugin>,
        names: impl IntoIterator<Item = &'a Utf8Path>,
    ) -> Vec<Utf8PathBuf> {
        dedup_by_name(
            names
                .into_iter()
                .filter_map(|name| disk.get(&plugin_key(name)))
                .map(|plugin| plugin.path.clone()),
        )
    }

    fn default_plugins(&self, disk: &HashMap<String, DiskPlugin>) -> Vec<Utf8PathBuf> {
        Self::resolve_existing(disk, self.game.default_plugins().map(Utf8Path::new))
    }

    fn cached(lock: &RwLock<Vec<Utf8PathBuf>>) -> Vec<Utf8PathBuf> {
        lock.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store_cache(lock: &RwLock<Vec<Utf8PathBuf>>, value: &[Utf8PathBuf]) {
        *lock.write().unwrap_or_else(PoisonError::into_inner) = value.to_vec();
    }

    /// Last-known-good list if there is one, else the game's default plugins.
    fn fallback(
        &self,
        lock: &RwLock<Vec<Utf8PathBuf>>,
        disk: &HashMap<String, DiskPlugin>,
        what: &str,
    ) -> Vec<Utf8PathBuf> {
        let cached = Self::cached(lock);
        if !cached.is_empty() {
            tracing::warn!("Using last known {} ({} plugins)", what, cached.len());
            self.metrics.record_cache_fallback();
            return Self::resolve_existing(disk, cached.iter().map(|p| p.as_path()));
        }

        tracing::warn!("No known {}; using the {} defaults", what, self.game);
        self.metrics.record_default_fallback();
        self.default_plugins(disk)
    }

    // Load order

    /// The current load order as absolute plugin paths.
    ///
    /// Timestamp games order by last-write time. Other games follow
    /// `loadorder.txt`, with plugins it does not mention appended oldest first.
    pub fn load_order(&self) -> Vec<Utf8PathBuf> {
        let order = if self.game.uses_timestamp_order() {
            self.timestamp_load_order()
        } else {
            self.listed_load_order()
        };

        match order {
            Some(order) => {
                let order = critical_first(self.game, order);
                Self::store_cache(&self.last_load_order, &order);
                order
            }
            None => {
                let disk = self.disk_index();
                critical_first(
                    self.game,
                    self.fallback(&self.last_load_order, &disk, "load order"),
                )
            }
        }
    }

    fn timestamp_load_order(&self) -> Option<Vec<Utf8PathBuf>> {
        match self.scan_plugin_dir() {
            Ok(mut disk) => {
                self.forget_missing(&disk);
                sort_by_timestamp(&mut disk);
                Some(disk.into_iter().map(|plugin| plugin.path).collect())
            }
            Err(e) => {
                tracing::warn!("Could not scan {}: {}", self.paths.plugin_dir, e);
                None
            }
        }
    }

    fn listed_load_order(&self) -> Option<Vec<Utf8PathBuf>> {
        let record = self.paths.load_order_file();
        let listed = match read_record(self.store.as_ref(), &record, &self.retry, &self.metrics) {
            RecordRead::Entries(names) => names.into_iter().map(Utf8PathBuf::from).collect(),
            RecordRead::Missing => {
                tracing::debug!("{} does not exist", record);
                Self::cached(&self.last_load_order)
            }
            RecordRead::Failed => return None,
        };

        let disk = self.disk_plugins();
        let index: HashMap<String, DiskPlugin> = disk
            .iter()
            .map(|plugin| (plugin.key(), plugin.clone()))
            .collect();
        let existing = Self::resolve_existing(&index, listed.iter().map(|p| p.as_path()));
        Some(append_missing(existing, &disk))
    }

    /// Replace the load order.
    ///
    /// Existing critical plugins are placed first, followed by the existing
    /// entries of `plugins` in the given order. Timestamp games get their
    /// plugins' last-write times rewritten one minute apart starting at the
    /// master file's time; plugins not listed keep their timestamps. Other
    /// games get `loadorder.txt` rewritten.
    ///
    /// Afterwards previously active plugins that remain in the new order stay
    /// active and `plugins.txt` is rewritten to match. If the active list is
    /// unknown (unreadable `plugins.txt`, nothing cached) it is left untouched.
    ///
    /// # Returns
    /// The least successful outcome of the writes involved.
    pub fn set_load_order(&self, plugins: &[Utf8PathBuf]) -> WriteOutcome {
        let disk = self.disk_index();
        let previous_active = self.read_known_active(&disk);

        let critical = self
            .game
            .critical_plugins()
            .iter()
            .filter_map(|name| disk.get(&name_key(name)))
            .map(|plugin| plugin.path.clone());
        let requested = plugins
            .iter()
            .filter(|plugin| !self.game.is_critical(&plugin_key(plugin)))
            .filter_map(|plugin| disk.get(&plugin_key(plugin)))
            .map(|plugin| plugin.path.clone());
        let order = dedup_by_name(critical.chain(requested));

        Self::store_cache(&self.last_load_order, &order);

        let mut outcome = {
            let _guard = self.notifier.begin_write(Channel::LoadOrder);
            if self.game.uses_timestamp_order() {
                self.write_timestamps(&order, &disk)
            } else {
                let names: Vec<String> = order.iter().map(|p| self.paths.relativize(p)).collect();
                write_record(
                    self.store.as_ref(),
                    &self.paths.load_order_file(),
                    &names,
                    &self.retry,
                    &self.metrics,
                )
            }
        };
        tracing::info!("Load order set: {} plugins ({:?})", order.len(), outcome);

        match previous_active {
            Some(previous_active) => {
                let still_active = intersect_in_order(&order, &previous_active);
                if !still_active.is_empty() {
                    outcome = outcome.worst(self.write_active(&still_active));
                }
            }
            None => tracing::warn!(
                "Active plugins unknown ({} unreadable); leaving it untouched",
                self.paths.plugins_file()
            ),
        }

        outcome
    }

    fn write_timestamps(
        &self,
        order: &[Utf8PathBuf],
        disk: &HashMap<String, DiskPlugin>,
    ) -> WriteOutcome {
        let anchor = disk
            .get(&name_key(self.game.master_plugin()))
            .map(|master| master.modified)
            .unwrap_or(self.started);

        let mut outcome = WriteOutcome::Unchanged;
        let mut time = anchor;
        for plugin in order {
            let current = disk.get(&plugin_key(plugin)).map(|p| p.modified);
            if current != Some(time) {
                outcome = outcome.worst(write_timestamp(
                    self.store.as_ref(),
                    plugin,
                    time,
                    &self.retry,
                    &self.metrics,
                ));
            }
            time += TIMESTAMP_STEP;
        }
        outcome
    }

    /// Index of `plugin` in the load order.
    pub fn plugin_position(&self, plugin: &Utf8Path) -> Option<usize> {
        let key = plugin_key(plugin);
        self.load_order()
            .iter()
            .position(|entry| plugin_key(entry) == key)
    }

    /// The plugin at `index` in the load order.
    pub fn indexed_plugin(&self, index: usize) -> Option<Utf8PathBuf> {
        self.load_order().into_iter().nth(index)
    }

    /// Move one plugin to `index`.
    ///
    /// The index is clamped to the load order and never places a plugin ahead
    /// of the critical plugins. Critical plugins themselves cannot move.
    ///
    /// # Errors
    /// [`LoadOrderError::PluginNotFound`] if the plugin is not on disk.
    pub fn set_plugin_position(
        &self,
        plugin: &Utf8Path,
        index: usize,
    ) -> Result<WriteOutcome, LoadOrderError> {
        let path = self
            .resolve_plugin(plugin)
            .ok_or_else(|| LoadOrderError::PluginNotFound(plugin.to_string()))?;
        let key = plugin_key(&path);

        let mut order = self.load_order();
        order.retain(|entry| plugin_key(entry) != key);

        if !self.game.is_critical(&key) {
            let first_free = order
                .iter()
                .take_while(|entry| self.game.is_critical(&plugin_key(entry)))
                .count();
            let index = index.clamp(first_free, order.len());
            order.insert(index, path);
        }

        Ok(self.set_load_order(&order))
    }

    /// Sort the current load order with `sorter` and, unless `trial_only`,
    /// apply the result.
    ///
    /// # Errors
    /// [`LoadOrderError::Sorter`] when the sorter fails; nothing is written then.
    pub fn sort_plugins(
        &self,
        sorter: &dyn PluginSorter,
        trial_only: bool,
    ) -> Result<SortResult, LoadOrderError> {
        let current = self.load_order();
        let result = sorter.sort(&current, trial_only)?;
        tracing::info!(
            "Sorted {} plugins, {} recognised",
            result.sorted.len(),
            result.recognized
        );

        if !trial_only {
            self.set_load_order(&result.sorted);
        }
        Ok(result)
    }

    // Active plugins

    /// `plugins.txt` resolved against disk, in file order. Caches on success.
    ///
    /// Returns `None` when the record could not be read and nothing was ever
    /// read from or written to it, i.e. only the game defaults are left.
    fn read_known_active(&self, disk: &HashMap<String, DiskPlugin>) -> Option<Vec<Utf8PathBuf>> {
        let record = self.paths.plugins_file();
        match read_record(self.store.as_ref(), &record, &self.retry, &self.metrics) {
            RecordRead::Entries(names) => {
                let listed: Vec<Utf8PathBuf> = names.into_iter().map(Utf8PathBuf::from).collect();
                let active = Self::resolve_existing(disk, listed.iter().map(|p| p.as_path()));
                Self::store_cache(&self.last_active, &active);
                Some(active)
            }
            RecordRead::Missing => {
                let cached = Self::cached(&self.last_active);
                if !cached.is_empty() {
                    tracing::debug!("{} is missing; using last known active plugins", record);
                }
                Some(Self::resolve_existing(disk, cached.iter().map(|p| p.as_path())))
            }
            RecordRead::Failed => {
                let cached = Self::cached(&self.last_active);
                if cached.is_empty() {
                    return None;
                }
                tracing::warn!("Using last known active plugins ({} plugins)", cached.len());
                self.metrics.record_cache_fallback();
                Some(Self::resolve_existing(disk, cached.iter().map(|p| p.as_path())))
            }
        }
    }

    /// Like [`Self::read_known_active`], falling back to the game defaults.
    fn read_active(&self, disk: &HashMap<String, DiskPlugin>) -> Vec<Utf8PathBuf> {
        self.read_known_active(disk).unwrap_or_else(|| {
            tracing::warn!("No known active plugins; using the {} defaults", self.game);
            self.metrics.record_default_fallback();
            self.default_plugins(disk)
        })
    }

    /// Active plugins that exist on disk, in load order.
    pub fn active_plugins(&self) -> Vec<Utf8PathBuf> {
        let disk = self.disk_index();
        let active = self.read_active(&disk);
        sort_by_load_order(active, &self.load_order())
    }

    /// Replace the active plugin list.
    ///
    /// Names that are not plugin filenames and duplicates are dropped. The
    /// last-known-good list is updated even if the write is abandoned.
    pub fn set_active_plugins(&self, plugins: &[Utf8PathBuf]) -> WriteOutcome {
        let active = dedup_by_name(
            plugins
                .iter()
                .filter(|plugin| plugin.file_name().is_some_and(is_plugin_filename))
                .map(|plugin| self.paths.resolve(plugin.as_str())),
        );
        self.write_active(&active)
    }

    fn write_active(&self, active: &[Utf8PathBuf]) -> WriteOutcome {
        Self::store_cache(&self.last_active, active);

        let names: Vec<String> = active.iter().map(|p| self.paths.relativize(p)).collect();
        let _guard = self.notifier.begin_write(Channel::ActivePlugins);
        write_record(
            self.store.as_ref(),
            &self.paths.plugins_file(),
            &names,
            &self.retry,
            &self.metrics,
        )
    }

    pub fn is_plugin_active(&self, plugin: &Utf8Path) -> bool {
        let key = plugin_key(plugin);
        self.active_plugins()
            .iter()
            .any(|active| plugin_key(active) == key)
    }

    /// Activate or deactivate one plugin.
    ///
    /// # Errors
    /// - [`LoadOrderError::NotAPlugin`] if the name is not a plugin filename
    /// - [`LoadOrderError::PluginNotFound`] when activating a plugin that is not on disk
    /// - [`LoadOrderError::TooManyActivePlugins`] when the game's limit is reached
    ///
    /// Returns [`WriteOutcome::GaveUp`] without writing when `plugins.txt`
    /// cannot be read and no active list has been seen yet.
    pub fn set_plugin_active(
        &self,
        plugin: &Utf8Path,
        active: bool,
    ) -> Result<WriteOutcome, LoadOrderError> {
        if !plugin.file_name().is_some_and(is_plugin_filename) {
            return Err(LoadOrderError::NotAPlugin(plugin.to_string()));
        }

        let disk = self.disk_index();
        let Some(known) = self.read_known_active(&disk) else {
            tracing::warn!(
                "Cannot change {}: active plugins unknown ({} unreadable)",
                plugin,
                self.paths.plugins_file()
            );
            return Ok(WriteOutcome::GaveUp);
        };

        let key = plugin_key(plugin);
        let mut current = sort_by_load_order(known, &self.load_order());
        let position = current.iter().position(|entry| plugin_key(entry) == key);

        match (active, position) {
            (true, Some(_)) | (false, None) => Ok(WriteOutcome::Unchanged),
            (true, None) => {
                let path = self
                    .resolve_plugin(plugin)
                    .ok_or_else(|| LoadOrderError::PluginNotFound(plugin.to_string()))?;
                let max = self.game.max_active_plugins();
                if current.len() >= max {
                    return Err(LoadOrderError::TooManyActivePlugins {
                        plugin: plugin.to_string(),
                        max,
                    });
                }
                current.push(path);
                Ok(self.write_active(&current))
            }
            (false, Some(index)) => {
                current.remove(index);
                Ok(self.write_active(&current))
            }
        }
    }

    pub fn is_master(&self, plugin: &Utf8Path) -> bool {
        is_master_file(plugin)
    }

    /// True while fewer than the game's maximum number of plugins are active.
    pub fn can_activate_plugins(&self) -> bool {
        self.active_plugins().len() < self.game.max_active_plugins()
    }

    // Change notification

    /// Turn a filesystem event into a change notification and broadcast it.
    ///
    /// # Returns
    /// The change that was broadcast, or `None` if the event is irrelevant for
    /// this game or was caused by the engine's own writes.
    pub fn on_watch_event(&self, event: &WatchEvent) -> Option<PluginChange> {
        let change = match event {
            WatchEvent::RecordChanged(RecordKind::ActivePlugins) => {
                PluginChange::ActivePluginsChanged
            }
            WatchEvent::RecordChanged(RecordKind::LoadOrder) => {
                if self.game.uses_timestamp_order() {
                    return None;
                }
                PluginChange::LoadOrderChanged
            }
            WatchEvent::PluginModified(_) => {
                if !self.game.uses_timestamp_order() {
                    return None;
                }
                PluginChange::LoadOrderChanged
            }
            WatchEvent::PluginRemoved(path) => {
                self.known_plugins
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&plugin_key(path));
                return None;
            }
            WatchEvent::PluginCreated(path) => {
                if self.notifier.is_suppressed(Channel::LoadOrder) {
                    self.metrics.record_notification(false);
                    return None;
                }
                let newly_seen = self
                    .known_plugins
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(plugin_key(path));
                if !newly_seen {
                    return None;
                }
                PluginChange::ExternalPluginAdded { path: path.clone() }
            }
        };

        let emitted = self.notifier.notify(change.clone());
        self.metrics.record_notification(emitted);
        emitted.then_some(change)
    }
}
