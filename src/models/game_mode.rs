use crate::services::load_order::LoadOrderError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of simultaneously active plugins the Gamebryo engine accepts.
pub const MAX_ACTIVE_PLUGINS: usize = 255;

/// Name of the active plugin record inside the per-game local data folder.
pub const PLUGINS_FILE_NAME: &str = "plugins.txt";

/// Name of the explicit load order record inside the per-game local data folder.
pub const LOAD_ORDER_FILE_NAME: &str = "loadorder.txt";

/// Supported Gamebryo games.
///
/// Each variant carries static metadata: the mode id used for the local data
/// folder, the critical plugins that must load first (in order), the official
/// DLC plugins used as a last-resort default, and whether the game derives its
/// load order from plugin timestamps or from `loadorder.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    Oblivion,
    Fallout3,
    FalloutNV,
    Skyrim,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [
        GameMode::Oblivion,
        GameMode::Fallout3,
        GameMode::FalloutNV,
        GameMode::Skyrim,
    ];

    /// Parse a mode id (case-insensitive).
    ///
    /// # Errors
    /// [`LoadOrderError::UnsupportedGame`] for anything that is not one of [`GameMode::ALL`].
    pub fn from_mode_id(mode_id: &str) -> Result<Self, LoadOrderError> {
        let mode_id = mode_id.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.mode_id().eq_ignore_ascii_case(mode_id))
            .ok_or_else(|| LoadOrderError::UnsupportedGame(mode_id.to_string()))
    }

    /// Identifier used for the per-game folder under the local application data directory.
    pub fn mode_id(&self) -> &'static str {
        match self {
            GameMode::Oblivion => "Oblivion",
            GameMode::Fallout3 => "Fallout3",
            GameMode::FalloutNV => "FalloutNV",
            GameMode::Skyrim => "Skyrim",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GameMode::Oblivion => "The Elder Scrolls IV: Oblivion",
            GameMode::Fallout3 => "Fallout 3",
            GameMode::FalloutNV => "Fallout: New Vegas",
            GameMode::Skyrim => "The Elder Scrolls V: Skyrim",
        }
    }

    /// Plugins that must always occupy the leading load order slots, in this order.
    pub fn critical_plugins(&self) -> &'static [&'static str] {
        match self {
            GameMode::Oblivion => &["Oblivion.esm"],
            GameMode::Fallout3 => &["Fallout3.esm"],
            GameMode::FalloutNV => &["FalloutNV.esm"],
            GameMode::Skyrim => &["Skyrim.esm", "Update.esm"],
        }
    }

    /// Official DLC plugins, in their canonical order.
    pub fn official_plugins(&self) -> &'static [&'static str] {
        match self {
            GameMode::Oblivion => &[
                "DLCShiveringIsles.esp",
                "Knights.esp",
                "DLCFrostcrag.esp",
                "DLCSpellTomes.esp",
                "DLCMehrunesRazor.esp",
                "DLCOrrery.esp",
                "DLCThievesDen.esp",
                "DLCVileLair.esp",
                "DLCHorseArmor.esp",
                "DLCBattlehornCastle.esp",
            ],
            GameMode::Fallout3 => &[
                "Anchorage.esm",
                "ThePitt.esm",
                "BrokenSteel.esm",
                "PointLookout.esm",
                "Zeta.esm",
            ],
            GameMode::FalloutNV => &[
                "DeadMoney.esm",
                "HonestHearts.esm",
                "OldWorldBlues.esm",
                "LonesomeRoad.esm",
                "GunRunnersArsenal.esm",
                "ClassicPack.esm",
                "MercenaryPack.esm",
                "TribalPack.esm",
                "CaravanPack.esm",
            ],
            GameMode::Skyrim => &["Dawnguard.esm", "HearthFires.esm", "Dragonborn.esm"],
        }
    }

    /// The game's own master file (first critical plugin).
    pub fn master_plugin(&self) -> &'static str {
        self.critical_plugins()[0]
    }

    /// True when the load order is encoded in plugin last-write times rather
    /// than in `loadorder.txt`.
    pub fn uses_timestamp_order(&self) -> bool {
        !matches!(self, GameMode::Skyrim)
    }

    pub fn max_active_plugins(&self) -> usize {
        MAX_ACTIVE_PLUGINS
    }

    /// Position of `name` among the critical plugins, if it is one.
    pub fn critical_index(&self, name: &str) -> Option<usize> {
        self.critical_plugins()
            .iter()
            .position(|critical| critical.eq_ignore_ascii_case(name))
    }

    pub fn is_critical(&self, name: &str) -> bool {
        self.critical_index(name).is_some()
    }

    /// Critical followed by official plugin names: the built-in default list.
    pub fn default_plugins(&self) -> impl Iterator<Item = &'static str> {
        self.critical_plugins()
            .iter()
            .chain(self.official_plugins())
            .copied()
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode_id())
    }
}

impl FromStr for GameMode {
    type Err = LoadOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_mode_id(s)
    }
}

/// Filesystem locations the engine works against for one game install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    /// The game's `Data` folder holding the plugin files.
    pub plugin_dir: Utf8PathBuf,

    /// Per-game local data folder holding `plugins.txt` and `loadorder.txt`.
    pub local_data_dir: Utf8PathBuf,
}

impl GamePaths {
    pub fn new(plugin_dir: impl Into<Utf8PathBuf>, local_data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            local_data_dir: local_data_dir.into(),
        }
    }

    pub fn plugins_file(&self) -> Utf8PathBuf {
        self.local_data_dir.join(PLUGINS_FILE_NAME)
    }

    pub fn load_order_file(&self) -> Utf8PathBuf {
        self.local_data_dir.join(LOAD_ORDER_FILE_NAME)
    }

    /// Absolute path for a plugin named relative to the plugin directory.
    pub fn resolve(&self, name: &str) -> Utf8PathBuf {
        let candidate = Utf8Path::new(name);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.plugin_dir.join(candidate)
        }
    }

    /// The name a plugin path is written as in the persisted records.
    pub fn relativize(&self, path: &Utf8Path) -> String {
        match path.strip_prefix(&self.plugin_dir) {
            Ok(relative) if !relative.as_str().is_empty() => relative.to_string(),
            _ => path.file_name().unwrap_or(path.as_str()).to_string(),
        }
    }
}
