//! Pure list operations used to reconcile load orders.
//!
//! Nothing here touches the filesystem. Plugin identity is the lowercased
//! filename, see [`plugin_key`].

use crate::models::plugin::plugin_key;
use crate::models::{DiskPlugin, GameMode};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Drop later duplicates, keeping the first occurrence of each plugin.
pub fn dedup_by_name(plugins: impl IntoIterator<Item = Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut unique: IndexMap<String, Utf8PathBuf> = IndexMap::new();
    for plugin in plugins {
        unique.entry(plugin_key(&plugin)).or_insert(plugin);
    }
    unique.into_values().collect()
}

/// Move critical plugins to the front in the game's fixed order, keeping the
/// relative order of everything else.
pub fn critical_first(game: GameMode, plugins: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let (mut critical, rest): (Vec<_>, Vec<_>) = plugins
        .into_iter()
        .partition(|plugin| game.is_critical(&plugin_key(plugin)));

    critical.sort_by_key(|plugin| game.critical_index(&plugin_key(plugin)));
    critical.extend(rest);
    critical
}

/// Order disk plugins by last-write time, ties broken by name.
pub fn sort_by_timestamp(plugins: &mut [DiskPlugin]) {
    plugins.sort_by_cached_key(|plugin| (plugin.modified, plugin.key()));
}

/// Append every disk plugin missing from `order`, oldest first.
pub fn append_missing(mut order: Vec<Utf8PathBuf>, disk: &[DiskPlugin]) -> Vec<Utf8PathBuf> {
    let listed: HashSet<String> = order.iter().map(|plugin| plugin_key(plugin)).collect();

    let mut missing: Vec<DiskPlugin> = disk
        .iter()
        .filter(|plugin| !listed.contains(&plugin.key()))
        .cloned()
        .collect();
    sort_by_timestamp(&mut missing);

    order.extend(missing.into_iter().map(|plugin| plugin.path));
    order
}

/// Entries of `order` that also appear in `subset`, in `order`'s order.
pub fn intersect_in_order(order: &[Utf8PathBuf], subset: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
    let wanted: HashSet<String> = subset.iter().map(|plugin| plugin_key(plugin)).collect();
    order
        .iter()
        .filter(|plugin| wanted.contains(&plugin_key(plugin)))
        .cloned()
        .collect()
}

/// Stable-sort `plugins` by their position in `order`; unknown plugins go last.
pub fn sort_by_load_order(mut plugins: Vec<Utf8PathBuf>, order: &[Utf8PathBuf]) -> Vec<Utf8PathBuf> {
    let positions: HashMap<String, usize> = order
        .iter()
        .enumerate()
        .map(|(index, plugin)| (plugin_key(plugin), index))
        .collect();

    plugins.sort_by_cached_key(|plugin| {
        positions
            .get(&plugin_key(plugin))
            .copied()
            .unwrap_or(usize::MAX)
    });
    plugins
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn paths(names: &[&str]) -> Vec<Utf8PathBuf> {
        names.iter().map(|n| Utf8PathBuf::from("/data").join(n)).collect()
    }

    fn disk(name: &str, secs: u64) -> DiskPlugin {
        DiskPlugin {
            path: Utf8PathBuf::from("/data").join(name),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_dedup_keeps_first() {
        let result = dedup_by_name(paths(&["A.esp", "B.esp", "a.ESP", "C.esp"]));
        assert_eq!(result, paths(&["A.esp", "B.esp", "C.esp"]));
    }

    #[test]
    fn test_critical_first() {
        let result = critical_first(
            GameMode::Skyrim,
            paths(&["Mod.esp", "Update.esm", "Dawnguard.esm", "Skyrim.esm"]),
        );
        assert_eq!(
            result,
            paths(&["Skyrim.esm", "Update.esm", "Mod.esp", "Dawnguard.esm"])
        );
    }

    #[test]
    fn test_sort_by_timestamp_breaks_ties_by_name() {
        let mut plugins = vec![disk("b.esp", 10), disk("A.esp", 10), disk("Old.esm", 5)];
        sort_by_timestamp(&mut plugins);

        let names: Vec<_> = plugins.iter().map(|p| p.path.file_name().unwrap()).collect();
        assert_eq!(names, ["Old.esm", "A.esp", "b.esp"]);
    }

    #[test]
    fn test_append_missing() {
        let on_disk = vec![disk("Listed.esp", 1), disk("New.esp", 30), disk("Newer.esp", 20)];
        let result = append_missing(paths(&["listed.esp"]), &on_disk);
        assert_eq!(result, paths(&["listed.esp", "Newer.esp", "New.esp"]));
    }

    #[test]
    fn test_intersect_in_order() {
        let order = paths(&["Fallout3.esm", "Mod1.esp", "DLC.esm"]);
        let subset = paths(&["dlc.esm", "Gone.esp", "Fallout3.esm"]);
        assert_eq!(
            intersect_in_order(&order, &subset),
            paths(&["Fallout3.esm", "DLC.esm"])
        );
    }

    #[test]
    fn test_sort_by_load_order() {
        let order = paths(&["Fallout3.esm", "Mod1.esp", "DLC.esm"]);
        let result = sort_by_load_order(paths(&["Unknown.esp", "DLC.esm", "fallout3.esm"]), &order);
        assert_eq!(result, paths(&["fallout3.esm", "DLC.esm", "Unknown.esp"]));
    }
}
