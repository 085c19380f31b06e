//! Shared blob store boundary.
//!
//! Keys are file base names. At most one blob exists per key and `put`
//! overwrites. The store assigns `last_modified` at write time.
//!
//! ## `FsBlobStore` layout
//!
//! ```text
//! <root>/
//!   objects/<key>        blob content
//!   meta/<key>.json      { last_modified, size, digest }
//! ```
//!
//! Both files are written with the temp-sibling + rename pattern. A blob
//! without a sidecar (dropped into `objects/` by hand) falls back to the
//! file's own mtime and a freshly computed digest.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use shuttle_core::paths::is_tmp_artifact;

use crate::error::{io_err, SyncError};
use crate::writer::{atomic_write, local_mtime, truncate_ms};

/// Metadata of one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// SHA-256 hex digest of the content.
    pub digest: String,
}

/// Storage backend shared by every host taking part in synchronization.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous blob.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRecord, SyncError>;

    /// Content of `key`; [`SyncError::BlobNotFound`] if absent.
    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError>;

    /// Metadata of `key`, `None` if absent.
    fn head(&self, key: &str) -> Result<Option<BlobRecord>, SyncError>;

    /// Every key in the store, sorted.
    fn list(&self) -> Result<Vec<String>, SyncError>;
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Reject keys that would escape the store root.
pub fn validate_key(key: &str) -> Result<(), SyncError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        return Err(SyncError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory-backed store
// ---------------------------------------------------------------------------

/// Blob store rooted at a directory, typically a mount shared by both hosts.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    last_modified: DateTime<Utc>,
    size: u64,
    digest: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{key}.json"))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRecord, SyncError> {
        validate_key(key)?;
        let sidecar = Sidecar {
            last_modified: truncate_ms(Utc::now()),
            size: bytes.len() as u64,
            digest: sha256_hex(bytes),
        };
        atomic_write(&self.object_path(key), bytes)?;
        atomic_write(&self.meta_path(key), &serde_json::to_vec_pretty(&sidecar)?)?;
        tracing::debug!("stored blob {key} ({} bytes)", sidecar.size);
        Ok(BlobRecord {
            key: key.to_string(),
            last_modified: sidecar.last_modified,
            size: sidecar.size,
            digest: sidecar.digest,
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        validate_key(key)?;
        let path = self.object_path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(SyncError::BlobNotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(io_err(path, err)),
        }
    }

    fn head(&self, key: &str) -> Result<Option<BlobRecord>, SyncError> {
        validate_key(key)?;
        let object = self.object_path(key);
        let Some(object_mtime) = local_mtime(&object)? else {
            return Ok(None);
        };

        let meta_path = self.meta_path(key);
        match std::fs::read(&meta_path) {
            Ok(raw) => {
                let sidecar: Sidecar = serde_json::from_slice(&raw)?;
                Ok(Some(BlobRecord {
                    key: key.to_string(),
                    last_modified: sidecar.last_modified,
                    size: sidecar.size,
                    digest: sidecar.digest,
                }))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let bytes = std::fs::read(&object).map_err(|e| io_err(&object, e))?;
                Ok(Some(BlobRecord {
                    key: key.to_string(),
                    last_modified: object_mtime,
                    size: bytes.len() as u64,
                    digest: sha256_hex(&bytes),
                }))
            }
            Err(err) => Err(io_err(meta_path, err)),
        }
    }

    fn list(&self) -> Result<Vec<String>, SyncError> {
        let dir = self.root.join("objects");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&dir, err)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if !ty.is_file() || is_tmp_artifact(&entry.path()) {
                continue;
            }
            keys.push(entry.file_name().to_string_lossy().into_owned());
        }
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-process store with a controllable clock, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, (Vec<u8>, BlobRecord)>>,
    clock: Mutex<Option<DateTime<Utc>>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the timestamp assigned by subsequent `put`s (`None` = wall clock).
    pub fn set_clock(&self, at: Option<DateTime<Utc>>) {
        *self.clock.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    /// Seed a blob with an explicit timestamp without counting it as a put.
    pub fn insert_at(&self, key: &str, bytes: &[u8], at: DateTime<Utc>) {
        let record = BlobRecord {
            key: key.to_string(),
            last_modified: truncate_ms(at),
            size: bytes.len() as u64,
            digest: sha256_hex(bytes),
        };
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (bytes.to_vec(), record));
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    fn now(&self) -> DateTime<Utc> {
        let pinned = *self.clock.lock().unwrap_or_else(|p| p.into_inner());
        truncate_ms(pinned.unwrap_or_else(Utc::now))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRecord, SyncError> {
        validate_key(key)?;
        let record = BlobRecord {
            key: key.to_string(),
            last_modified: self.now(),
            size: bytes.len() as u64,
            digest: sha256_hex(bytes),
        };
        self.blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (bytes.to_vec(), record.clone()));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.content(key).ok_or_else(|| SyncError::BlobNotFound {
            key: key.to_string(),
        })
    }

    fn head(&self, key: &str) -> Result<Option<BlobRecord>, SyncError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map(|(_, record)| record.clone()))
    }

    fn list(&self) -> Result<Vec<String>, SyncError> {
        Ok(self
            .blobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect())
    }
}
