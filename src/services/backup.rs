use camino::{Utf8Path, Utf8PathBuf};
use std::fs::OpenOptions;
use std::io;

/// Fixed suffix appended to a record's stem for its backup.
pub const BACKUP_SUFFIX: &str = "plugin-order.bak";

/// Where the one-time backup of `record` lives: `<stem>.plugin-order.bak` next to it.
pub fn backup_path(record: &Utf8Path) -> Utf8PathBuf {
    let stem = record.file_stem().unwrap_or("record");
    record.with_file_name(format!("{}.{}", stem, BACKUP_SUFFIX))
}

/// Copy `record` to its backup path unless a backup already exists.
///
/// # Returns
/// `Ok(true)` when a backup was created, `Ok(false)` when the record is
/// missing or a backup was already there.
pub fn backup_once(record: &Utf8Path) -> io::Result<bool> {
    if !record.is_file() {
        return Ok(false);
    }

    let target = backup_path(record);
    let mut dest = match OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let mut source = std::fs::File::open(record)?;
    io::copy(&mut source, &mut dest)?;
    tracing::info!("Backed up {} to {}", record, target);
    Ok(true)
}

/// Back up each record, logging failures instead of propagating them.
pub fn backup_records<'a>(records: impl IntoIterator<Item = &'a Utf8Path>) {
    for record in records {
        if let Err(e) = backup_once(record) {
            tracing::warn!("Failed to back up {}: {}", record, e);
        }
    }
}
