//! Integration tests for LoadOrderEngine against real game folders
//!
//! These tests verify that the engine:
//! - Keeps critical plugins first for both ordering schemes
//! - Drops plugins that no longer exist on disk
//! - Falls back to last-known-good state when records disappear
//! - Keeps the active list consistent with reorders

use camino::{Utf8Path, Utf8PathBuf};
use filetime::{FileTime, set_file_mtime};
use plugin_order::services::records::RetryPolicy;
use plugin_order::services::{MasterlistSorter, SorterError};
use plugin_order::{EngineOptions, GameMode, GamePaths, LoadOrderEngine, LoadOrderError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

struct GameInstall {
    _dir: TempDir,
    paths: GamePaths,
}

impl GameInstall {
    /// Plugins get increasing timestamps in the order given.
    fn new(plugins: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let paths = GamePaths::new(root.join("Data"), root.join("AppData"));
        fs::create_dir_all(&paths.plugin_dir).unwrap();
        fs::create_dir_all(&paths.local_data_dir).unwrap();

        let install = Self { _dir: dir, paths };
        for (i, plugin) in plugins.iter().enumerate() {
            install.add_plugin(plugin, 1_200_000_000 + i as i64 * 3600);
        }
        install
    }

    fn add_plugin(&self, name: &str, unix_time: i64) {
        let path = self.paths.plugin_dir.join(name);
        fs::write(&path, b"TES4").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(unix_time, 0)).unwrap();
    }

    fn engine(&self, game: GameMode) -> LoadOrderEngine {
        let options = EngineOptions {
            retry: RetryPolicy::new(Duration::from_millis(1), 2),
            settle_window: Duration::ZERO,
        };
        LoadOrderEngine::new(game, self.paths.clone(), options)
    }

    fn names(&self, plugins: &[Utf8PathBuf]) -> Vec<String> {
        plugins
            .iter()
            .map(|p| p.file_name().unwrap().to_string())
            .collect()
    }

    fn paths_for(&self, names: &[&str]) -> Vec<Utf8PathBuf> {
        names.iter().map(|n| self.paths.plugin_dir.join(n)).collect()
    }
}

#[test]
fn test_fallout3_reorder_scenario() {
    let install = GameInstall::new(&["Fallout3.esm", "DLC.esm", "Mod1.esp"]);
    let engine = install.engine(GameMode::Fallout3);

    engine.set_load_order(&install.paths_for(&["Mod1.esp", "DLC.esm"]));

    assert_eq!(
        install.names(&engine.load_order()),
        ["Fallout3.esm", "Mod1.esp", "DLC.esm"]
    );
}

#[test]
fn test_critical_plugins_cannot_be_displaced() {
    let install = GameInstall::new(&["Mod.esp", "Update.esm", "Skyrim.esm"]);
    let engine = install.engine(GameMode::Skyrim);

    engine.set_load_order(&install.paths_for(&["Mod.esp", "Update.esm", "Skyrim.esm"]));

    assert_eq!(
        install.names(&engine.load_order()),
        ["Skyrim.esm", "Update.esm", "Mod.esp"]
    );
}

#[test]
fn test_active_file_with_deleted_plugin() {
    let install = GameInstall::new(&["FalloutNV.esm", "Mod.esp", "Deleted.esp"]);
    fs::write(
        install.paths.plugins_file(),
        "FalloutNV.esm\nMod.esp\nDeleted.esp\n",
    )
    .unwrap();
    fs::remove_file(install.paths.plugin_dir.join("Deleted.esp")).unwrap();
    let engine = install.engine(GameMode::FalloutNV);

    assert_eq!(
        install.names(&engine.active_plugins()),
        ["FalloutNV.esm", "Mod.esp"]
    );
}

#[test]
fn test_external_delete_of_plugins_file() {
    let install = GameInstall::new(&["Oblivion.esm", "A.esp", "B.esp"]);
    let engine = install.engine(GameMode::Oblivion);

    engine.set_active_plugins(&install.paths_for(&["Oblivion.esm", "B.esp"]));
    fs::remove_file(install.paths.plugins_file()).unwrap();

    assert_eq!(
        install.names(&engine.active_plugins()),
        ["Oblivion.esm", "B.esp"]
    );
}

#[test]
fn test_loadorder_file_round_trip_appends_new_plugins() {
    let install = GameInstall::new(&["Skyrim.esm", "Update.esm", "A.esp", "B.esp"]);
    let engine = install.engine(GameMode::Skyrim);

    engine.set_load_order(&install.paths_for(&["B.esp", "Missing.esp", "A.esp"]));
    install.add_plugin("Later.esp", 1_300_000_000);
    install.add_plugin("Earlier.esp", 1_250_000_000);

    assert_eq!(
        install.names(&engine.load_order()),
        ["Skyrim.esm", "Update.esm", "B.esp", "A.esp", "Earlier.esp", "Later.esp"]
    );
}

#[test]
fn test_loadorder_file_case_insensitive() {
    let install = GameInstall::new(&["Skyrim.esm", "Update.esm", "MyMod.esp"]);
    fs::write(
        install.paths.load_order_file(),
        "SKYRIM.ESM\r\nmymod.esp\r\nupdate.esm\r\nmymod.ESP\r\n",
    )
    .unwrap();
    let engine = install.engine(GameMode::Skyrim);

    assert_eq!(
        install.names(&engine.load_order()),
        ["Skyrim.esm", "Update.esm", "MyMod.esp"]
    );
}

#[test]
fn test_reorder_preserves_active_subset() {
    let install = GameInstall::new(&["Fallout3.esm", "A.esp", "B.esp", "C.esp"]);
    let engine = install.engine(GameMode::Fallout3);
    engine.set_active_plugins(&install.paths_for(&["Fallout3.esm", "A.esp", "C.esp"]));

    engine.set_load_order(&install.paths_for(&["C.esp", "B.esp", "A.esp"]));

    assert_eq!(
        install.names(&engine.load_order()),
        ["Fallout3.esm", "C.esp", "B.esp", "A.esp"]
    );
    assert_eq!(
        install.names(&engine.active_plugins()),
        ["Fallout3.esm", "C.esp", "A.esp"]
    );
}

#[test]
fn test_backups_survive_engine_writes() {
    let install = GameInstall::new(&["Skyrim.esm", "A.esp"]);
    fs::write(install.paths.plugins_file(), "Skyrim.esm\n").unwrap();
    fs::write(install.paths.load_order_file(), "Skyrim.esm\n").unwrap();

    let engine = install.engine(GameMode::Skyrim);
    engine.set_load_order(&install.paths_for(&["A.esp"]));
    engine.set_active_plugins(&install.paths_for(&["Skyrim.esm", "A.esp"]));

    // A second engine must not overwrite the original backups
    let _second = install.engine(GameMode::Skyrim);

    let local = &install.paths.local_data_dir;
    assert_eq!(
        fs::read_to_string(local.join("plugins.plugin-order.bak")).unwrap(),
        "Skyrim.esm\n"
    );
    assert_eq!(
        fs::read_to_string(local.join("loadorder.plugin-order.bak")).unwrap(),
        "Skyrim.esm\n"
    );
}

#[test]
fn test_masterlist_sort_end_to_end() {
    let install = GameInstall::new(&["Skyrim.esm", "Patch.esp", "Base.esm", "Loose.esp"]);
    let masterlist = install.paths.local_data_dir.join("masterlist.txt");
    fs::write(&masterlist, "Base.esm\nPatch.esp\n").unwrap();
    let engine = install.engine(GameMode::Skyrim);

    let sorter = MasterlistSorter::new(&masterlist, GameMode::Skyrim);
    let trial = engine.sort_plugins(&sorter, true).unwrap();
    assert_eq!(
        install.names(&trial.sorted),
        ["Skyrim.esm", "Base.esm", "Patch.esp", "Loose.esp"]
    );
    assert!(!install.paths.load_order_file().exists());

    engine.sort_plugins(&sorter, false).unwrap();
    assert_eq!(install.names(&engine.load_order()), install.names(&trial.sorted));
}

#[test]
fn test_sort_with_missing_masterlist() {
    let install = GameInstall::new(&["Skyrim.esm"]);
    let engine = install.engine(GameMode::Skyrim);
    let sorter = MasterlistSorter::new(Utf8Path::new("/nonexistent/masterlist.txt"), GameMode::Skyrim);

    let err = engine.sort_plugins(&sorter, false).unwrap_err();
    assert!(matches!(
        err,
        LoadOrderError::Sorter(SorterError { code: 6, .. })
    ));
}

#[test]
fn test_empty_install() {
    let install = GameInstall::new(&[]);
    let engine = install.engine(GameMode::Oblivion);

    assert!(engine.load_order().is_empty());
    assert!(engine.active_plugins().is_empty());
    assert!(engine.can_activate_plugins());
}
