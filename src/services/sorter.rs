//! Plugin sorting against an external masterlist.
//!
//! [`PluginSorter`] is the boundary to whatever knows the "correct" order for
//! a set of plugins. Sorter failures carry the vendor-style status code the
//! sorting backends report; [`check_status`] turns a code into
//! `Ok`/`Err` and swallows the informational and warning codes.

use crate::models::GameMode;
use crate::models::plugin::{name_key, parse_record_line, plugin_key};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs;
use std::io;
use thiserror::Error;

/// Status codes reported by sorting backends.
pub mod status {
    pub const OK: u32 = 0;
    pub const WARN_BAD_FILENAME: u32 = 1;
    pub const WARN_LO_MISMATCH: u32 = 2;
    pub const FILE_READ_FAIL: u32 = 3;
    pub const FILE_WRITE_FAIL: u32 = 4;
    pub const FILE_NOT_UTF8: u32 = 5;
    pub const FILE_NOT_FOUND: u32 = 6;
    pub const FILE_RENAME_FAIL: u32 = 7;
    pub const TIMESTAMP_READ_FAIL: u32 = 8;
    pub const TIMESTAMP_WRITE_FAIL: u32 = 9;
    pub const FILE_PARSE_FAIL: u32 = 10;
    pub const NO_MEM: u32 = 11;
    pub const INVALID_ARGS: u32 = 12;
    pub const WARN_INVALID_LIST: u32 = 13;
    pub const OK_NO_UPDATE_NECESSARY: u32 = 31;

    /// Codes that are reported to the log but are not failures.
    pub const WHITELISTED: [u32; 6] = [
        OK,
        WARN_BAD_FILENAME,
        WARN_LO_MISMATCH,
        INVALID_ARGS,
        WARN_INVALID_LIST,
        OK_NO_UPDATE_NECESSARY,
    ];

    pub fn name(code: u32) -> &'static str {
        match code {
            OK => "OK",
            WARN_BAD_FILENAME => "WARN_BAD_FILENAME",
            WARN_LO_MISMATCH => "WARN_LO_MISMATCH",
            FILE_READ_FAIL => "ERROR_FILE_READ_FAIL",
            FILE_WRITE_FAIL => "ERROR_FILE_WRITE_FAIL",
            FILE_NOT_UTF8 => "ERROR_FILE_NOT_UTF8",
            FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            FILE_RENAME_FAIL => "ERROR_FILE_RENAME_FAIL",
            TIMESTAMP_READ_FAIL => "ERROR_TIMESTAMP_READ_FAIL",
            TIMESTAMP_WRITE_FAIL => "ERROR_TIMESTAMP_WRITE_FAIL",
            FILE_PARSE_FAIL => "ERROR_FILE_PARSE_FAIL",
            NO_MEM => "ERROR_NO_MEM",
            INVALID_ARGS => "ERROR_INVALID_ARGS",
            WARN_INVALID_LIST => "WARN_INVALID_LIST",
            OK_NO_UPDATE_NECESSARY => "OK_NO_UPDATE_NECESSARY",
            _ => "UNKNOWN_ERROR",
        }
    }
}

/// A sorter call that failed with a non-whitelisted status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name} ({code}): {message}")]
pub struct SorterError {
    pub code: u32,
    pub name: &'static str,
    pub message: String,
}

impl SorterError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            name: status::name(code),
            message: message.into(),
        }
    }
}

/// Map a backend status code to a result.
///
/// Whitelisted codes are logged and treated as success; every other code,
/// including unknown ones, becomes a [`SorterError`].
pub fn check_status(code: u32, details: &str) -> Result<(), SorterError> {
    if status::WHITELISTED.contains(&code) {
        if code != status::OK {
            tracing::warn!("Sorter reported {}: {}", status::name(code), details);
        }
        return Ok(());
    }

    Err(SorterError::new(code, details))
}

/// Output of a successful sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortResult {
    pub sorted: Vec<Utf8PathBuf>,
    /// How many of the sorted plugins the masterlist knew about.
    pub recognized: usize,
}

#[cfg_attr(test, mockall::automock)]
pub trait PluginSorter: Send + Sync {
    /// Sort `plugins`. With `trial_only` the sorter must not persist anything
    /// of its own.
    fn sort(&self, plugins: &[Utf8PathBuf], trial_only: bool) -> Result<SortResult, SorterError>;
}

/// Sorts plugins by their position in a plain-text masterlist.
///
/// The masterlist names one plugin per line (`#` comments and unrelated lines
/// are ignored). Critical plugins lead, then masterlist-known plugins in
/// masterlist order, then everything else in its incoming order.
#[derive(Debug, Clone)]
pub struct MasterlistSorter {
    masterlist_path: Utf8PathBuf,
    game: GameMode,
}

impl MasterlistSorter {
    pub fn new(masterlist_path: impl Into<Utf8PathBuf>, game: GameMode) -> Self {
        Self {
            masterlist_path: masterlist_path.into(),
            game,
        }
    }

    pub fn masterlist_path(&self) -> &Utf8Path {
        &self.masterlist_path
    }

    fn load_masterlist(&self) -> Result<Masterlist, SorterError> {
        let bytes = fs::read(&self.masterlist_path).map_err(|e| {
            let code = if e.kind() == io::ErrorKind::NotFound {
                status::FILE_NOT_FOUND
            } else {
                status::FILE_READ_FAIL
            };
            SorterError::new(code, format!("{}: {}", self.masterlist_path, e))
        })?;

        let text = String::from_utf8(bytes).map_err(|_| {
            SorterError::new(status::FILE_NOT_UTF8, self.masterlist_path.to_string())
        })?;

        let mut masterlist = Masterlist::default();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_record_line(trimmed) {
                Some(name) => {
                    let next = masterlist.ranks.len();
                    masterlist.ranks.entry(name_key(name)).or_insert(next);
                }
                None => masterlist.bad_lines += 1,
            }
        }
        Ok(masterlist)
    }

    /// Status code describing a loaded masterlist.
    fn status_of(&self, masterlist: &Masterlist) -> (u32, String) {
        if masterlist.ranks.is_empty() {
            (
                status::WARN_INVALID_LIST,
                format!("{} names no plugins", self.masterlist_path),
            )
        } else if masterlist.bad_lines > 0 {
            (
                status::WARN_BAD_FILENAME,
                format!(
                    "{} lines of {} are not plugin filenames",
                    masterlist.bad_lines, self.masterlist_path
                ),
            )
        } else {
            (status::OK, String::new())
        }
    }
}

#[derive(Debug, Default)]
struct Masterlist {
    ranks: IndexMap<String, usize>,
    bad_lines: usize,
}

impl PluginSorter for MasterlistSorter {
    fn sort(&self, plugins: &[Utf8PathBuf], trial_only: bool) -> Result<SortResult, SorterError> {
        let masterlist = self.load_masterlist()?;
        let (code, details) = self.status_of(&masterlist);
        check_status(code, &details)?;

        let ranks = masterlist.ranks;
        tracing::debug!(
            "Sorting {} plugins against {} masterlist entries (trial: {})",
            plugins.len(),
            ranks.len(),
            trial_only
        );

        let mut seen = HashSet::new();
        let mut critical = Vec::new();
        let mut known = Vec::new();
        let mut unknown = Vec::new();

        for plugin in plugins {
            let key = plugin_key(plugin);
            if !seen.insert(key.clone()) {
                continue;
            }

            if let Some(index) = self.game.critical_index(&key) {
                critical.push((index, plugin.clone()));
            } else if let Some(&rank) = ranks.get(&key) {
                known.push((rank, plugin.clone()));
            } else {
                unknown.push(plugin.clone());
            }
        }

        critical.sort_by_key(|(index, _)| *index);
        known.sort_by_key(|(rank, _)| *rank);
        let recognized = critical.len() + known.len();

        let sorted = critical
            .into_iter()
            .map(|(_, plugin)| plugin)
            .chain(known.into_iter().map(|(_, plugin)| plugin))
            .chain(unknown)
            .collect();

        Ok(SortResult { sorted, recognized })
    }
}
