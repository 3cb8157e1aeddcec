//! Persisted record access for `plugins.txt` and `loadorder.txt`.
//!
//! The game, launchers, and other mod tools all touch these files, so every
//! access goes through [`with_retry`]: a bounded poll that waits out transient
//! lock contention and then gives up. Giving up is never fatal. Readers fall
//! back to cached state and writers report [`WriteOutcome::GaveUp`].

use crate::metrics::Metrics;
use crate::models::plugin::parse_record_line;
use camino::Utf8Path;
use filetime::FileTime;
use std::fs;
use std::io;
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Bounded busy-wait used while another process holds a record open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 20)
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{path} is still locked after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Raw file access behind the record and timestamp operations.
///
/// The filesystem implementation is [`FsRecordStore`]; tests substitute a
/// mock to simulate a file held open by another process.
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore: Send + Sync {
    /// Read a whole record. `Ok(None)` when the file does not exist.
    fn read(&self, path: &Utf8Path) -> io::Result<Option<String>>;

    /// Replace a record's contents, creating the parent folder if needed.
    fn write(&self, path: &Utf8Path, contents: &str) -> io::Result<()>;

    /// Set a file's last-write time.
    fn set_modified(&self, path: &Utf8Path, time: SystemTime) -> io::Result<()>;
}

/// [`RecordStore`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRecordStore;

impl RecordStore for FsRecordStore {
    fn read(&self, path: &Utf8Path) -> io::Result<Option<String>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write(&self, path: &Utf8Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, contents)
    }

    fn set_modified(&self, path: &Utf8Path, time: SystemTime) -> io::Result<()> {
        filetime::set_file_mtime(path, FileTime::from_system_time(time))
    }
}

/// Result of reading one persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRead {
    /// Plugin names in file order, malformed lines already dropped.
    Entries(Vec<String>),
    /// The file does not exist.
    Missing,
    /// Locked past the retry budget, unreadable, or not UTF-8.
    Failed,
}

/// Result of a write. Only [`WriteOutcome::Written`] touched the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Nothing needed writing.
    Unchanged,
    /// Another process held the file for the whole retry budget.
    GaveUp,
    /// A non-transient I/O error.
    Failed,
}

impl WriteOutcome {
    /// True unless the write was abandoned or failed.
    pub fn succeeded(&self) -> bool {
        matches!(self, WriteOutcome::Written | WriteOutcome::Unchanged)
    }

    /// Fold several outcomes into the least successful one.
    pub fn worst(self, other: WriteOutcome) -> WriteOutcome {
        match (self, other) {
            (WriteOutcome::Failed, _) | (_, WriteOutcome::Failed) => WriteOutcome::Failed,
            (WriteOutcome::GaveUp, _) | (_, WriteOutcome::GaveUp) => WriteOutcome::GaveUp,
            (WriteOutcome::Written, _) | (_, WriteOutcome::Written) => WriteOutcome::Written,
            _ => WriteOutcome::Unchanged,
        }
    }
}

impl From<&RecordError> for WriteOutcome {
    fn from(err: &RecordError) -> Self {
        match err {
            RecordError::LockTimeout { .. } => WriteOutcome::GaveUp,
            RecordError::Io { .. } => WriteOutcome::Failed,
        }
    }
}

/// True for errors that mean "someone else has the file open right now".
pub fn is_contention(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy
    ) {
        return true;
    }

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }

    false
}

/// Run `op` until it succeeds, fails with a non-contention error, or the
/// retry budget is spent.
///
/// # Arguments
/// * `policy` - Interval between attempts and the attempt budget
/// * `metrics` - Receives one retry per extra attempt and one timeout on exhaustion
/// * `path` - The file being accessed, for errors and logs
/// * `op` - The access to attempt
pub fn with_retry<T>(
    policy: &RetryPolicy,
    metrics: &Metrics,
    path: &Utf8Path,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, RecordError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_contention(&e) => {
                if attempt >= policy.max_attempts {
                    metrics.record_lock_timeout();
                    return Err(RecordError::LockTimeout {
                        path: path.to_string(),
                        attempts: attempt,
                    });
                }
                tracing::debug!(
                    "{} is locked (attempt {}/{}), retrying in {:?}",
                    path,
                    attempt,
                    policy.max_attempts,
                    policy.interval
                );
                metrics.record_lock_retry();
                attempt += 1;
                std::thread::sleep(policy.interval);
            }
            Err(source) => {
                return Err(RecordError::Io {
                    path: path.to_string(),
                    source,
                });
            }
        }
    }
}

/// Read a record and extract its plugin names.
pub fn read_record(
    store: &dyn RecordStore,
    path: &Utf8Path,
    policy: &RetryPolicy,
    metrics: &Metrics,
) -> RecordRead {
    match with_retry(policy, metrics, path, || store.read(path)) {
        Ok(Some(contents)) => {
            metrics.record_read();
            RecordRead::Entries(
                contents
                    .lines()
                    .filter_map(parse_record_line)
                    .map(str::to_string)
                    .collect(),
            )
        }
        Ok(None) => {
            metrics.record_read();
            RecordRead::Missing
        }
        Err(e) => {
            tracing::warn!("Could not read {}: {}", path, e);
            RecordRead::Failed
        }
    }
}

/// Write plugin names to a record, one per line.
pub fn write_record(
    store: &dyn RecordStore,
    path: &Utf8Path,
    names: &[String],
    policy: &RetryPolicy,
    metrics: &Metrics,
) -> WriteOutcome {
    let mut contents = names.join(LINE_ENDING);
    if !contents.is_empty() {
        contents.push_str(LINE_ENDING);
    }

    match with_retry(policy, metrics, path, || store.write(path, &contents)) {
        Ok(()) => {
            metrics.record_write();
            tracing::info!("Wrote {} entries to {}", names.len(), path);
            WriteOutcome::Written
        }
        Err(e) => {
            tracing::warn!("Giving up on writing {}: {}", path, e);
            WriteOutcome::from(&e)
        }
    }
}

/// Set one plugin's last-write time.
pub fn write_timestamp(
    store: &dyn RecordStore,
    path: &Utf8Path,
    time: SystemTime,
    policy: &RetryPolicy,
    metrics: &Metrics,
) -> WriteOutcome {
    match with_retry(policy, metrics, path, || store.set_modified(path, time)) {
        Ok(()) => {
            metrics.record_timestamp_write();
            WriteOutcome::Written
        }
        Err(e) => {
            tracing::warn!("Could not set timestamp on {}: {}", path, e);
            WriteOutcome::from(&e)
        }
    }
}
