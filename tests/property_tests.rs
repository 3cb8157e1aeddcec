//! Property-based tests for load order reconciliation
//!
//! These tests verify, for arbitrary requests against a fixed install:
//! - Critical plugins always lead the load order
//! - Writing a load order and reading it back agrees
//! - The active list is the requested set intersected with disk, in load order

use camino::Utf8PathBuf;
use filetime::{FileTime, set_file_mtime};
use plugin_order::models::plugin::plugin_key;
use plugin_order::services::records::RetryPolicy;
use plugin_order::services::reconcile::{critical_first, dedup_by_name};
use plugin_order::{EngineOptions, GameMode, GamePaths, LoadOrderEngine, WriteOutcome};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const POOL: [&str; 5] = ["Alpha.esp", "Bravo.esm", "Charlie.esp", "Delta.esp", "Echo.esp"];

fn install(game: GameMode) -> (TempDir, LoadOrderEngine) {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    let paths = GamePaths::new(root.join("Data"), root.join("Local"));
    fs::create_dir_all(&paths.plugin_dir).unwrap();

    let names = game.critical_plugins().iter().chain(POOL.iter());
    for (i, name) in names.enumerate() {
        let path = paths.plugin_dir.join(name);
        fs::write(&path, b"TES4").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_200_000_000 + i as i64 * 3600, 0))
            .unwrap();
    }

    let options = EngineOptions {
        retry: RetryPolicy::new(Duration::from_millis(1), 2),
        settle_window: Duration::ZERO,
    };
    let engine = LoadOrderEngine::new(game, paths, options);
    (dir, engine)
}

fn names(plugins: &[Utf8PathBuf]) -> Vec<String> {
    plugins
        .iter()
        .map(|p| p.file_name().unwrap().to_string())
        .collect()
}

fn request() -> impl Strategy<Value = Vec<String>> {
    let pool: Vec<String> = POOL.iter().map(|s| s.to_string()).collect();
    prop::sample::subsequence(pool, 0..=POOL.len()).prop_shuffle()
}

fn plugin_name() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(POOL.to_vec()).prop_map(str::to_string),
        prop::sample::select(POOL.to_vec()).prop_map(|s| s.to_uppercase()),
        "[A-Z][a-z]{2,6}\\.es[mp]",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_dedup_keeps_first_of_each_name(
        list in prop::collection::vec(plugin_name(), 0..12)
    ) {
        let paths: Vec<Utf8PathBuf> = list.iter().map(Utf8PathBuf::from).collect();
        let unique = dedup_by_name(paths.clone());

        let keys: Vec<String> = unique.iter().map(|p| plugin_key(p)).collect();
        let distinct: HashSet<&String> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len());

        let mut seen = HashSet::new();
        let firsts: Vec<&Utf8PathBuf> = paths.iter().filter(|p| seen.insert(plugin_key(p))).collect();
        prop_assert_eq!(unique.iter().collect::<Vec<_>>(), firsts);
    }

    #[test]
    fn prop_critical_first_is_stable_partition(order in request()) {
        let mut input: Vec<Utf8PathBuf> = order.iter().map(Utf8PathBuf::from).collect();
        input.insert(input.len() / 2, Utf8PathBuf::from("Update.esm"));
        input.push(Utf8PathBuf::from("Skyrim.esm"));

        let sorted = critical_first(GameMode::Skyrim, input.clone());

        prop_assert_eq!(&names(&sorted[..2]), &["Skyrim.esm", "Update.esm"]);
        let rest: Vec<Utf8PathBuf> = input
            .into_iter()
            .filter(|p| !GameMode::Skyrim.is_critical(&plugin_key(p)))
            .collect();
        prop_assert_eq!(&sorted[2..], &rest[..]);
    }

    #[test]
    fn prop_file_order_round_trip(order in request()) {
        let (_dir, engine) = install(GameMode::Skyrim);
        let plugin_dir = engine.paths().plugin_dir.clone();
        let requested: Vec<Utf8PathBuf> = order.iter().map(|n| plugin_dir.join(n)).collect();

        let outcome = engine.set_load_order(&requested);
        prop_assert_eq!(outcome, WriteOutcome::Written);

        let mut expected = vec!["Skyrim.esm".to_string(), "Update.esm".to_string()];
        expected.extend(order.iter().cloned());
        expected.extend(
            POOL.iter()
                .filter(|name| !order.iter().any(|o| o == *name))
                .map(|name| name.to_string()),
        );
        prop_assert_eq!(names(&engine.load_order()), expected);
    }

    #[test]
    fn prop_timestamp_order_is_idempotent(order in request()) {
        let (_dir, engine) = install(GameMode::Fallout3);
        let plugin_dir = engine.paths().plugin_dir.clone();
        let requested: Vec<Utf8PathBuf> = order.iter().map(|n| plugin_dir.join(n)).collect();

        engine.set_load_order(&requested);
        let first = engine.load_order();
        prop_assert_eq!(&names(&first[..1]), &["Fallout3.esm"]);

        engine.set_load_order(&first);
        prop_assert_eq!(&engine.load_order(), &first);
        prop_assert_eq!(engine.set_load_order(&first), WriteOutcome::Unchanged);
    }

    #[test]
    fn prop_active_is_request_on_disk_in_load_order(
        active in prop::collection::vec(plugin_name(), 0..8),
        order in request(),
    ) {
        let (_dir, engine) = install(GameMode::Skyrim);
        let plugin_dir = engine.paths().plugin_dir.clone();
        let requested: Vec<Utf8PathBuf> = order.iter().map(|n| plugin_dir.join(n)).collect();
        engine.set_load_order(&requested);

        let active_paths: Vec<Utf8PathBuf> = active.iter().map(Utf8PathBuf::from).collect();
        engine.set_active_plugins(&active_paths);

        let wanted: HashSet<String> = active_paths.iter().map(|p| plugin_key(p)).collect();
        let expected: Vec<Utf8PathBuf> = engine
            .load_order()
            .into_iter()
            .filter(|p| wanted.contains(&plugin_key(p)))
            .collect();
        prop_assert_eq!(engine.active_plugins(), expected);
    }
}
