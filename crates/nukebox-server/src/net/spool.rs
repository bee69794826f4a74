//! Temp-file helpers for uploads that are still being validated.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::library::sanitize;

/// Prefix shared by every temp file the server writes.
pub(crate) const TEMP_PREFIX: &str = "nukebox-";

/// Remove stale temp files left by an earlier run.
pub(crate) fn cleanup_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if !file_name.to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        if std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Temp path for one session's upload: `<dir>/nukebox-<session>-<sanitized leaf>`.
pub(crate) fn make_temp_path(dir: &Path, session_id: u64, filename: &str) -> PathBuf {
    let leaf = filename
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("upload");
    dir.join(format!("{TEMP_PREFIX}{session_id}-{}", sanitize(leaf)))
}

/// Write the received bytes to `path`, truncating anything already there.
pub(crate) fn write_spool(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Best-effort removal; a missing file is not an error.
pub(crate) fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, "temp cleanup warning: {e}"),
    }
}
