//! Directory snapshots for change detection.
//!
//! A snapshot maps every regular file under a root to its size and
//! modification time. Two snapshots taken one tick apart are diffed by the
//! polling backends to synthesize change events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// What a poller remembers about one file between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Full path to stamp.
pub type Snapshot = HashMap<PathBuf, FileStamp>;

impl FileStamp {
    /// Stamp a walk entry. Symlinks are resolved so the target's size counts;
    /// links to directories and broken links yield `None`.
    fn from_entry(entry: &DirEntry) -> std::io::Result<Option<Self>> {
        let raw = entry.metadata()?;
        let meta = if raw.is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(resolved) if resolved.is_file() => resolved,
                _ => return Ok(None),
            }
        } else if raw.is_file() {
            raw
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        }))
    }
}

/// Snapshot the files directly inside `root`, or the whole tree when
/// `recursive` is set.
///
/// Fails only when `root` itself cannot be read. Entries that disappear
/// between listing and stat are skipped.
pub fn snapshot_directory(root: &Path, recursive: bool) -> std::io::Result<Snapshot> {
    // Surface a missing or unreadable root as an error instead of an empty walk
    std::fs::read_dir(root)?;

    let mut walker = WalkDir::new(root).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Snapshot::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(root = %root.display(), "skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        match FileStamp::from_entry(&entry) {
            Ok(Some(stamp)) => {
                files.insert(entry.path().to_path_buf(), stamp);
            }
            Ok(None) => {}
            Err(e) => debug!(path = %entry.path().display(), "stat failed: {}", e),
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = snapshot_directory(temp_dir.path(), false)?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_snapshot_records_sizes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::write(temp_dir.path().join("file2.txt"), b"1234567")?;

        let files = snapshot_directory(temp_dir.path(), false)?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[&temp_dir.path().join("file1.txt")].size, 5);
        assert_eq!(files[&temp_dir.path().join("file2.txt")].size, 7);
        Ok(())
    }

    #[test]
    fn test_recursion_is_opt_in() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("top.txt"), b"a")?;
        fs::write(temp_dir.path().join("subdir/nested.txt"), b"b")?;

        assert_eq!(snapshot_directory(temp_dir.path(), false)?.len(), 1);
        assert_eq!(snapshot_directory(temp_dir.path(), true)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(snapshot_directory(&temp_dir.path().join("absent"), false).is_err());
    }
}
