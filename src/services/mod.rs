//! Services module - load order reconciliation and its collaborators.
//!
//! # Components
//!
//! - [`LoadOrderEngine`]: Reconciles disk state, `plugins.txt`, and `loadorder.txt`:
//!   - Load order queries and reordering (timestamp or file based per game)
//!   - Active plugin queries and activation
//!   - Fallback to last-known-good state when records are locked or unreadable
//!   - Change notification from filesystem events
//!
//! - [`records`]: Line-oriented record I/O with bounded retry on lock contention,
//!   behind the [`RecordStore`] trait
//!
//! - [`PluginSorter`]: Sorting boundary with [`MasterlistSorter`] as the
//!   built-in implementation and [`SorterError`] carrying vendor status codes
//!
//! - [`PluginWatcher`]: Debounced filesystem watch feeding the engine
//!
//! - [`backup`]: One-time copies of the persisted records
//!
//! - [`game_detection`]: Identify a game from its `Data` folder
//!
//! # Usage Example
//!
//! ```ignore
//! use plugin_order::services::{EngineOptions, LoadOrderEngine};
//! use plugin_order::models::{GameMode, GamePaths};
//!
//! let paths = GamePaths::new("C:/Games/Fallout 3/Data", "C:/Users/me/AppData/Local/Fallout3");
//! let engine = LoadOrderEngine::new(GameMode::Fallout3, paths, EngineOptions::default());
//!
//! let order = engine.load_order();
//! engine.set_load_order(&order[..]);
//! ```

pub mod backup;
pub mod game_detection;
pub mod load_order;
pub mod reconcile;
pub mod records;
pub mod sorter;
pub mod watcher;

pub use game_detection::{detect_game, detect_game_from_plugin_list, detect_game_mode};
pub use load_order::{EngineOptions, LoadOrderEngine, LoadOrderError};
pub use records::{FsRecordStore, RecordStore, RetryPolicy, WriteOutcome};
pub use sorter::{MasterlistSorter, PluginSorter, SortResult, SorterError};
pub use watcher::{PluginWatcher, RecordKind, WatchEvent};
