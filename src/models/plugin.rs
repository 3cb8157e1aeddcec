//! Plugin filename recognition and identity helpers.
//!
//! Gamebryo games identify plugins by filename only, compared without regard to
//! case. Everything in the crate that needs to decide "is this the same plugin?"
//! goes through [`plugin_key`] / [`name_key`].

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use std::time::SystemTime;

/// Lines of `plugins.txt` / `loadorder.txt` that name a plugin.
static PLUGIN_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\w.+\.es[mp]$").expect("Invalid plugin filename regex"));

/// Returns true if `name` is a recognised plugin filename (`^\w.+\.es[mp]$`, any case).
pub fn is_plugin_filename(name: &str) -> bool {
    PLUGIN_FILE_PATTERN.is_match(name)
}

/// Returns true if the path has a `.esp` or `.esm` extension.
///
/// Directory scans filter on extension alone; persisted records use the
/// stricter [`is_plugin_filename`] pattern.
pub fn has_plugin_extension(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("esp") || ext.eq_ignore_ascii_case("esm"))
}

/// Returns true for master files (`.esm`).
pub fn is_master_file(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("esm"))
}

/// Case-insensitive identity of a plugin name.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Case-insensitive identity of a plugin path (its filename).
pub fn plugin_key(path: &Utf8Path) -> String {
    name_key(path.file_name().unwrap_or(path.as_str()))
}

/// Extracts the plugin name from one line of a persisted record.
///
/// Blank lines, `#` comments and anything not matching the plugin pattern are
/// skipped. A leading `*` (the enabled marker later games write into
/// `plugins.txt`) is tolerated.
pub fn parse_record_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let name = line.strip_prefix('*').unwrap_or(line).trim();
    is_plugin_filename(name).then_some(name)
}

/// A plugin file found in the plugin directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPlugin {
    pub path: Utf8PathBuf,
    pub modified: SystemTime,
}

impl DiskPlugin {
    pub fn key(&self) -> String {
        plugin_key(&self.path)
    }
}
