//! Game detection from a plugin directory or a plugin list.
//!
//! Each supported game ships a distinctive master file (Skyrim.esm,
//! FalloutNV.esm, ...). Finding one identifies the game.
//!
//! # Examples
//!
//! ```ignore
//! use plugin_order::services::game_detection::detect_game_mode;
//! use camino::Utf8Path;
//!
//! let game = detect_game_mode(Utf8Path::new("C:/Games/Fallout 3/Data"));
//! assert_eq!(game, Some(GameMode::Fallout3));
//! ```

use crate::models::{GameMode, LOAD_ORDER_FILE_NAME, PLUGINS_FILE_NAME};
use crate::models::plugin::{name_key, parse_record_line, plugin_key};
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};

/// Detection order. New Vegas goes before Fallout 3 because Tale of Two
/// Wastelands installs ship both masters in a New Vegas `Data` folder.
const DETECTION_ORDER: [GameMode; 4] = [
    GameMode::Skyrim,
    GameMode::FalloutNV,
    GameMode::Fallout3,
    GameMode::Oblivion,
];

fn match_masters(names: &HashSet<String>) -> Option<GameMode> {
    DETECTION_ORDER
        .into_iter()
        .find(|game| names.contains(&name_key(game.master_plugin())))
}

/// Detects the game whose `Data` folder is `plugin_dir`.
///
/// # Arguments
///
/// * `plugin_dir` - The game's `Data` folder
///
/// # Returns
///
/// The game whose master file is present, or `None` if the folder cannot be
/// read or holds no known master.
pub fn detect_game_mode(plugin_dir: &Utf8Path) -> Option<GameMode> {
    let entries = match fs::read_dir(plugin_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read {} for game detection: {}", plugin_dir, e);
            return None;
        }
    };

    let names: HashSet<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .map(|name| name_key(&name))
        .collect();

    let game = match_masters(&names);
    match game {
        Some(game) => tracing::info!("Detected {} from {}", game.name(), plugin_dir),
        None => tracing::debug!("No known master file in {}", plugin_dir),
    }
    game
}

/// Detects the game from a `plugins.txt` or `loadorder.txt`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded
pub fn detect_game_from_plugin_list(list_path: &Utf8Path) -> Result<Option<GameMode>> {
    let file = File::open(list_path)
        .with_context(|| format!("Failed to open plugin list: {}", list_path))?;

    let mut names = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.context("Failed to read line from plugin list")?;
        if let Some(name) = parse_record_line(&line) {
            names.insert(plugin_key(Utf8Path::new(name)));
        }
    }

    Ok(match_masters(&names))
}

/// Detects the game from its `Data` folder, falling back to the plugin lists
/// in `record_dir` (`plugins.txt`, then `loadorder.txt`) when the folder holds
/// no known master.
pub fn detect_game(plugin_dir: &Utf8Path, record_dir: Option<&Utf8Path>) -> Option<GameMode> {
    if let Some(game) = detect_game_mode(plugin_dir) {
        return Some(game);
    }

    let record_dir = record_dir?;
    for file_name in [PLUGINS_FILE_NAME, LOAD_ORDER_FILE_NAME] {
        let list = record_dir.join(file_name);
        if !list.is_file() {
            continue;
        }
        match detect_game_from_plugin_list(&list) {
            Ok(Some(game)) => {
                tracing::info!("Detected {} from {}", game.name(), list);
                return Some(game);
            }
            Ok(None) => tracing::debug!("No known master listed in {}", list),
            Err(e) => tracing::warn!("Skipping {} for game detection: {:#}", list, e),
        }
    }
    None
}
