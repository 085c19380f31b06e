//! Local file primitives: atomic writes and millisecond mtimes.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use filetime::FileTime;

use shuttle_core::paths::tmp_sibling;

use crate::error::{io_err, SyncError};

/// Write `bytes` to `path` via a hidden temp sibling and `rename`, so readers
/// never observe a partially-written file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Modification time of `path` truncated to milliseconds; `None` if absent.
pub fn local_mtime(path: &Path) -> Result<Option<DateTime<Utc>>, SyncError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    if !meta.is_file() {
        return Ok(None);
    }
    let modified = meta.modified().map_err(|e| io_err(path, e))?;
    Ok(Some(truncate_ms(DateTime::<Utc>::from(modified))))
}

/// Stamp `path` with `at` so the next comparison against the blob is equal.
pub fn align_mtime(path: &Path, at: DateTime<Utc>) -> Result<(), SyncError> {
    let stamp = FileTime::from_unix_time(at.timestamp(), at.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, stamp).map_err(|e| io_err(path, e))
}

pub fn truncate_ms(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("notes.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert!(!tmp_sibling(&path).exists(), "tmp file should be renamed away");
    }

    #[test]
    fn missing_file_has_no_mtime() {
        let dir = TempDir::new().unwrap();
        assert_eq!(local_mtime(&dir.path().join("nope.txt")).unwrap(), None);
        assert_eq!(local_mtime(dir.path()).unwrap(), None, "directories are not files");
    }

    #[test]
    fn aligned_mtime_reads_back_to_the_millisecond() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();
        let stamp = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        align_mtime(&path, stamp).unwrap();
        assert_eq!(local_mtime(&path).unwrap(), Some(stamp));
    }
}
