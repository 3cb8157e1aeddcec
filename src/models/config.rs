use crate::models::{GameMode, GamePaths};
use crate::services::load_order::LoadOrderError;
use crate::services::records::RetryPolicy;
use anyhow::{Result, bail};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings file from `PluginOrder Settings.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(rename = "PluginOrder", default)]
    pub plugin_order: Settings,
}

/// User settings for one managed game install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Game mode id (`Oblivion`, `Fallout3`, `FalloutNV`, `Skyrim`).
    #[serde(rename = "Game", default)]
    pub game: String,

    /// The game's `Data` folder.
    #[serde(rename = "Plugin Directory", default)]
    pub plugin_directory: String,

    /// Override for the folder holding `plugins.txt` / `loadorder.txt`.
    /// Empty means `<local app data>/<mode id>`.
    #[serde(rename = "Local Data Directory", default)]
    pub local_data_directory: String,

    #[serde(rename = "Masterlist", default)]
    pub masterlist: String,

    #[serde(rename = "Retry Interval Ms", default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(rename = "Retry Attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(rename = "Settle Window Ms", default = "default_settle_window_ms")]
    pub settle_window_ms: u64,

    #[serde(rename = "Debounce Ms", default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game: String::new(),
            plugin_directory: String::new(),
            local_data_directory: String::new(),
            masterlist: String::new(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_attempts: default_retry_attempts(),
            settle_window_ms: default_settle_window_ms(),
            debounce_ms: default_debounce_ms(),
            debug_mode: false,
        }
    }
}

fn default_retry_interval_ms() -> u64 {
    500
}

fn default_retry_attempts() -> u32 {
    20
}

fn default_settle_window_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    250
}

impl Settings {
    pub fn game_mode(&self) -> Result<GameMode, LoadOrderError> {
        GameMode::from_mode_id(&self.game)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_interval_ms),
            self.retry_attempts,
        )
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn masterlist_path(&self) -> Option<Utf8PathBuf> {
        (!self.masterlist.trim().is_empty()).then(|| Utf8PathBuf::from(self.masterlist.trim()))
    }

    /// Resolve the plugin and local data folders for `game`.
    ///
    /// # Errors
    /// Fails when no plugin directory is configured, or when no local data
    /// directory is configured and the platform has none.
    pub fn game_paths(&self, game: GameMode) -> Result<GamePaths> {
        let plugin_dir = self.plugin_directory.trim();
        if plugin_dir.is_empty() {
            bail!("No plugin directory configured for {}", game);
        }

        let local_data_dir = if self.local_data_directory.trim().is_empty() {
            let Some(base) = dirs::data_local_dir() else {
                bail!("Could not determine the local application data folder");
            };
            let base = Utf8PathBuf::try_from(base)
                .map_err(|e| anyhow::anyhow!("Local data folder is not UTF-8: {}", e))?;
            base.join(game.mode_id())
        } else {
            Utf8PathBuf::from(self.local_data_directory.trim())
        };

        Ok(GamePaths::new(plugin_dir, local_data_dir))
    }
}
