//! Final placement of accepted uploads inside the library directory.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Extension given to every file placed in the library.
pub const LIBRARY_EXTENSION: &str = ".mp3";

/// Replace every char outside `[A-Za-z0-9_.-]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// `library_dir/<sanitized title>.mp3`
pub fn final_path_for(library_dir: &Path, title: &str) -> PathBuf {
    library_dir.join(format!("{}{LIBRARY_EXTENSION}", sanitize(title)))
}

/// Create an empty file at `path` if nothing is there yet.
///
/// Returns `true` when this call created the placeholder.
pub fn reserve_placeholder(path: &Path) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Move `from` onto `to`, replacing whatever is at `to`.
///
/// Falls back to copy + remove when a rename is not possible (temp and library
/// on different filesystems).
pub fn move_into_place(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(from = ?from, to = ?to, "rename failed ({rename_err}); copying");
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_allowed_chars() {
        let s = "Abc_123.mp3-x";
        assert_eq!(sanitize(s), s);
    }

    #[test]
    fn sanitize_replaces_everything_else() {
        assert_eq!(sanitize("Don't Stop Me Now!"), "Don-t-Stop-Me-Now-");
        assert_eq!(sanitize("a/b\\c"), "a-b-c");
        assert_eq!(sanitize("café"), "caf-");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for s in ["", "x y z", "ünï cödé", "../../etc/passwd", "ok.name"] {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once);
            assert_eq!(once.chars().count(), s.chars().count());
        }
    }

    #[test]
    fn final_path_uses_sanitized_title() {
        let p = final_path_for(Path::new("/music"), "Hey Jude");
        assert_eq!(p, PathBuf::from("/music/Hey-Jude.mp3"));
    }

    #[test]
    fn placeholder_reserves_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.mp3");
        assert!(reserve_placeholder(&p).unwrap());
        assert!(!reserve_placeholder(&p).unwrap());
        assert_eq!(fs::metadata(&p).unwrap().len(), 0);
    }

    #[test]
    fn move_replaces_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tmp.bin");
        let dst = dir.path().join("Song.mp3");
        fs::write(&src, b"content").unwrap();
        reserve_placeholder(&dst).unwrap();

        move_into_place(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"content");
        assert!(!src.exists());
    }

    #[test]
    fn move_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_into_place(&dir.path().join("nope"), &dir.path().join("dst.mp3"));
        assert!(err.is_err());
    }
}
