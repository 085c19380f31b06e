//! Tracked file registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.shuttle/
//!   tracked_files.txt   (newline-delimited absolute paths, sorted, UTF-8, mode 0600)
//! ```
//!
//! # Persistence rules
//!
//! - Every mutation is written (temp sibling + `rename`) *before* the
//!   in-memory set changes, so a crash never exposes a half-applied registry.
//! - Writes union the in-memory set with what is already on disk; only an
//!   explicit [`TrackedFileRegistry::remove`] shrinks the record.
//! - [`TrackedFileRegistry::load`] merges the record into memory, never drops
//!   entries.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{io_err, RegistryError};
use crate::paths;
use crate::types::{blob_key, TrackedFile};

/// Registry handle shared by the watcher, the reconciler and the orchestrator.
pub type SharedRegistry = Arc<Mutex<TrackedFileRegistry>>;

#[derive(Debug)]
pub struct TrackedFileRegistry {
    record_path: PathBuf,
    files: BTreeMap<PathBuf, TrackedFile>,
}

impl TrackedFileRegistry {
    /// Open the registry recorded at `record_path`, loading any persisted entries.
    pub fn open(record_path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let mut registry = Self {
            record_path: record_path.into(),
            files: BTreeMap::new(),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Open `<home>/.shuttle/tracked_files.txt`.
    pub fn open_at(home: &Path) -> Result<Self, RegistryError> {
        Self::open(paths::registry_path(home))
    }

    /// `open_at` convenience wrapper.
    pub fn open_default() -> Result<Self, RegistryError> {
        let home = dirs::home_dir().ok_or(RegistryError::HomeNotFound)?;
        Self::open_at(&home)
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Merge the persisted record into memory. Returns how many entries were new.
    pub fn load(&mut self) -> Result<usize, RegistryError> {
        let persisted = read_record(&self.record_path)?;
        let mut added = 0;
        for path in persisted {
            if !self.files.contains_key(&path) {
                self.files.insert(path.clone(), TrackedFile::new(path));
                added += 1;
            }
        }
        Ok(added)
    }

    /// Write the in-memory set, unioned with whatever is already on disk.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let mut merged = read_record(&self.record_path)?;
        merged.extend(self.files.keys().cloned());
        write_record(&self.record_path, &merged)
    }

    /// Start tracking `path`.
    ///
    /// Fails with [`RegistryError::InvalidPath`] unless `path` is an existing
    /// regular file, with [`RegistryError::Unrecordable`] if its name cannot be
    /// written as one record line, and with [`RegistryError::AlreadyTracked`]
    /// on duplicates.
    pub fn add(&mut self, path: &Path) -> Result<&TrackedFile, RegistryError> {
        let path = absolute(path)?;
        if !path.is_file() {
            return Err(RegistryError::InvalidPath { path });
        }
        if !fits_record(&path) {
            return Err(RegistryError::Unrecordable { path });
        }
        if self.files.contains_key(&path) {
            return Err(RegistryError::AlreadyTracked { path });
        }

        let mut next = read_record(&self.record_path)?;
        next.extend(self.files.keys().cloned());
        next.insert(path.clone());
        write_record(&self.record_path, &next)?;

        self.merge_paths(next);
        Ok(&self.files[&path])
    }

    /// Like [`add`](Self::add) but treats an already-tracked path as success.
    pub fn ensure(&mut self, path: &Path) -> Result<bool, RegistryError> {
        match self.add(path) {
            Ok(_) => Ok(true),
            Err(RegistryError::AlreadyTracked { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stop tracking `path`.
    pub fn remove(&mut self, path: &Path) -> Result<TrackedFile, RegistryError> {
        let path = absolute(path)?;
        if !self.files.contains_key(&path) {
            return Err(RegistryError::NotFound { path });
        }

        let mut next = read_record(&self.record_path)?;
        next.extend(self.files.keys().cloned());
        next.remove(&path);
        write_record(&self.record_path, &next)?;

        let removed = self
            .files
            .remove(&path)
            .ok_or_else(|| RegistryError::NotFound { path: path.clone() })?;
        self.merge_paths(next);
        Ok(removed)
    }

    pub fn snapshot(&self) -> BTreeSet<PathBuf> {
        self.files.keys().cloned().collect()
    }

    pub fn get(&self, path: &Path) -> Option<&TrackedFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedFile> {
        self.files.values()
    }

    /// Map an observed path onto a tracked path: exact match first, then a
    /// base-name match (editors that save via temp file + rename).
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        if self.files.contains_key(path) {
            return Some(path.to_path_buf());
        }
        let key = blob_key(path)?;
        self.find_by_key(&key)
    }

    /// First tracked path whose base name equals `key`.
    pub fn find_by_key(&self, key: &str) -> Option<PathBuf> {
        self.files
            .keys()
            .find(|tracked| blob_key(tracked).as_deref() == Some(key))
            .cloned()
    }

    /// Remember the timestamps observed on a successful transfer.
    /// Returns `false` if `path` is not tracked.
    pub fn record_sync(
        &mut self,
        path: &Path,
        local: Option<DateTime<Utc>>,
        remote: Option<DateTime<Utc>>,
    ) -> bool {
        match self.files.get_mut(path) {
            Some(entry) => {
                entry.last_known_local_mtime = local;
                entry.last_known_remote_mtime = remote;
                true
            }
            None => false,
        }
    }

    fn merge_paths(&mut self, paths: BTreeSet<PathBuf>) {
        for path in paths {
            self.files
                .entry(path.clone())
                .or_insert_with(|| TrackedFile::new(path));
        }
    }
}

/// Lock a [`SharedRegistry`], recovering the guard if a holder panicked.
pub fn lock(registry: &SharedRegistry) -> MutexGuard<'_, TrackedFileRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Record file
// ---------------------------------------------------------------------------

/// Read the record at `path`; a missing file is an empty set.
pub fn read_record(path: &Path) -> Result<BTreeSet<PathBuf>, RegistryError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    // Only the line terminator is stripped: names may end in whitespace.
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Atomically write `entries` to `path`: serialize → temp sibling → `chmod 0600` → `rename`.
pub fn write_record(path: &Path, entries: &BTreeSet<PathBuf>) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&entry.to_string_lossy());
        contents.push('\n');
    }

    let tmp = paths::tmp_sibling(path);
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// One record line per path: UTF-8 with no line breaks.
fn fits_record(path: &Path) -> bool {
    path.to_str().is_some_and(|s| !s.contains(['\n', '\r']))
}

fn absolute(path: &Path) -> Result<PathBuf, RegistryError> {
    std::path::absolute(path).map_err(|e| io_err(path, e))
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
