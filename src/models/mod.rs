//! Data models for plugin-order.
//!
//! - [`GameMode`]: Static per-game metadata (critical plugins, official DLC, ordering scheme)
//! - [`GamePaths`]: Where a game's plugins and persisted records live
//! - [`Settings`]: User settings loaded from `PluginOrder Settings.yaml`
//! - [`plugin`]: Plugin filename recognition and case-insensitive identity

pub mod config;
pub mod game_mode;
pub mod plugin;

pub use config::{Settings, SettingsFile};
pub use game_mode::{
    GameMode, GamePaths, LOAD_ORDER_FILE_NAME, MAX_ACTIVE_PLUGINS, PLUGINS_FILE_NAME,
};
pub use plugin::DiskPlugin;
