//! Blob sync engine.
//!
//! ## `sync_one` protocol
//!
//! 1. Derive the blob key (file base name).
//! 2. Read the local mtime and `head` the blob.
//! 3. Decide: forced direction, or [`decide`] for `Auto`.
//! 4. Transfer (upload = `put`; download = `get` + atomic write).
//! 5. Stamp the local file with the blob's `last_modified`, so an immediate
//!    second `Auto` pass compares equal and skips.
//! 6. Track the file in the registry if it is new, record the timestamps.
//! 7. After an upload, notify the peer (best-effort).
//!
//! The engine holds the registry lock only for bookkeeping, never across a
//! transfer. Two callers syncing the same file concurrently may race; the last
//! write to the store or to disk wins.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use shuttle_core::{
    blob_key, has_allowed_extension,
    registry::{lock, SharedRegistry},
    SyncDirection,
};

use crate::blob::{validate_key, BlobRecord, BlobStore};
use crate::decision::{decide, SyncDecision};
use crate::error::{io_err, SyncError};
use crate::notify::ChangeNotifier;
use crate::writer::{align_mtime, atomic_write, local_mtime};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What `sync_one` did for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Uploaded,
    Downloaded,
    Skipped,
}

/// Per-file result of a batch; a failed file never aborts its batch.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: Result<SyncOutcome, SyncError>,
}

/// Counts for one batch, suitable for logs and status payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassSummary {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match &report.outcome {
                Ok(SyncOutcome::Uploaded) => summary.uploaded += 1,
                Ok(SyncOutcome::Downloaded) => summary.downloaded += 1,
                Ok(SyncOutcome::Skipped) => summary.skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.downloaded + self.skipped + self.failed
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: Arc<dyn BlobStore>,
    registry: SharedRegistry,
    sync_dir: PathBuf,
    extensions: Vec<String>,
    peer: RwLock<Option<Arc<dyn ChangeNotifier>>>,
    /// Paths whose download is being written right now.
    downloading: Mutex<HashSet<PathBuf>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("sync_dir", &self.sync_dir)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn BlobStore>,
        registry: SharedRegistry,
        sync_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            registry,
            sync_dir: sync_dir.into(),
            extensions: Vec::new(),
            peer: RwLock::new(None),
            downloading: Mutex::new(HashSet::new()),
        }
    }

    /// Restrict `reconcile` to blob keys with these extensions.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_peer(self, peer: Arc<dyn ChangeNotifier>) -> Self {
        self.set_peer(Some(peer));
        self
    }

    /// Replace the counterpart notified after uploads (`None` disables it).
    pub fn set_peer(&self, peer: Option<Arc<dyn ChangeNotifier>>) {
        *self.peer.write().unwrap_or_else(|p| p.into_inner()) = peer;
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn sync_dir(&self) -> &Path {
        &self.sync_dir
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Synchronize a single file.
    pub fn sync_one(&self, path: &Path, direction: SyncDirection) -> Result<SyncOutcome, SyncError> {
        let key = blob_key(path).ok_or_else(|| SyncError::NoKey {
            path: path.to_path_buf(),
        })?;
        let local = local_mtime(path)?;
        let remote = self.store.head(&key)?;

        let decision = match direction {
            SyncDirection::ForceUpload => {
                if local.is_none() {
                    return Err(SyncError::LocalMissing {
                        path: path.to_path_buf(),
                    });
                }
                SyncDecision::Upload
            }
            SyncDirection::ForceDownload => {
                if remote.is_none() {
                    return Err(SyncError::BlobNotFound { key });
                }
                SyncDecision::Download
            }
            SyncDirection::Auto => decide(local, remote.as_ref().map(|r| r.last_modified))
                .ok_or_else(|| SyncError::Missing {
                    path: path.to_path_buf(),
                })?,
        };

        match (decision, remote) {
            (SyncDecision::Upload, _) => self.upload(path, &key, local),
            (SyncDecision::Download, Some(record)) => self.download(path, &record),
            (SyncDecision::Download, None) => Err(SyncError::BlobNotFound { key }),
            (SyncDecision::Skip, remote) => {
                tracing::debug!("in sync: {}", path.display());
                self.track(path, local, remote.map(|r| r.last_modified));
                Ok(SyncOutcome::Skipped)
            }
        }
    }

    /// Synchronize every path independently and report each outcome.
    pub fn sync_all<I>(&self, paths: I, direction: SyncDirection) -> Vec<FileReport>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        paths
            .into_iter()
            .map(|path| {
                let outcome = self.sync_one(&path, direction);
                if let Err(err) = &outcome {
                    tracing::warn!("sync failed for {}: {err}", path.display());
                }
                FileReport { path, outcome }
            })
            .collect()
    }

    /// Full bidirectional pass: every tracked file plus every blob in the
    /// store. Blobs with no tracked counterpart land in the sync directory.
    pub fn reconcile(&self) -> Result<Vec<FileReport>, SyncError> {
        let mut targets: BTreeSet<PathBuf> = lock(&self.registry).snapshot();
        let keys = self.store.list()?;

        for key in keys {
            if !has_allowed_extension(Path::new(&key), &self.extensions) {
                tracing::debug!("ignoring blob outside the extension allow-list: {key}");
                continue;
            }
            let covered = targets
                .iter()
                .any(|tracked| blob_key(tracked).as_deref() == Some(key.as_str()));
            if !covered {
                targets.insert(self.local_path_for_key(&key));
            }
        }

        let reports = self.sync_all(targets, SyncDirection::Auto);
        let summary = PassSummary::from_reports(&reports);
        tracing::info!(
            "reconcile pass: {} uploaded, {} downloaded, {} skipped, {} failed",
            summary.uploaded,
            summary.downloaded,
            summary.skipped,
            summary.failed
        );
        Ok(reports)
    }

    /// Eagerly fetch one key after a peer reported it changed.
    pub fn pull(&self, key: &str) -> FileReport {
        if let Err(err) = validate_key(key) {
            return FileReport {
                path: PathBuf::from(key),
                outcome: Err(err),
            };
        }
        let path = self.local_path_for_key(key);
        let outcome = self.sync_one(&path, SyncDirection::ForceDownload);
        FileReport { path, outcome }
    }

    /// Tracked path for `key`, or `<sync_dir>/<key>` when nothing matches.
    /// `key` must already be a valid blob key.
    pub fn local_path_for_key(&self, key: &str) -> PathBuf {
        lock(&self.registry)
            .find_by_key(key)
            .unwrap_or_else(|| self.sync_dir.join(key))
    }

    /// `true` when the file's mtime is exactly what the last transfer left
    /// behind, i.e. nothing changed it since. A file that is being
    /// downloaded counts as settled.
    pub fn is_settled(&self, path: &Path) -> bool {
        if self.in_download(path) {
            return true;
        }
        let recorded = lock(&self.registry)
            .get(path)
            .and_then(|tracked| tracked.last_known_local_mtime);
        match (recorded, local_mtime(path)) {
            (Some(recorded), Ok(Some(current))) => recorded == current,
            _ => false,
        }
    }

    fn upload(
        &self,
        path: &Path,
        key: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<SyncOutcome, SyncError> {
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        let record = self.store.put(key, &bytes)?;
        tracing::info!("uploaded: {} -> {key}", path.display());

        // Only stamp if nobody touched the file while it was in flight.
        let after = local_mtime(path)?;
        let local = if after == before {
            align_mtime(path, record.last_modified)?;
            Some(record.last_modified)
        } else {
            // The blob holds the bytes read before the edit: keep the local
            // side strictly newer so the next pass uploads again.
            if after.is_some_and(|at| at <= record.last_modified) {
                align_mtime(path, record.last_modified + chrono::Duration::milliseconds(1))?;
            }
            tracing::info!("changed during upload, left for the next pass: {}", path.display());
            None
        };
        self.track(path, local, Some(record.last_modified));
        self.notify_peer(key);
        Ok(SyncOutcome::Uploaded)
    }

    fn download(&self, path: &Path, record: &BlobRecord) -> Result<SyncOutcome, SyncError> {
        let bytes = self.store.get(&record.key)?;
        self.downloads().insert(path.to_path_buf());
        let written = atomic_write(path, &bytes)
            .and_then(|()| align_mtime(path, record.last_modified))
            .map(|()| self.track(path, Some(record.last_modified), Some(record.last_modified)));
        self.downloads().remove(path);
        written?;
        tracing::info!("downloaded: {} -> {}", record.key, path.display());
        Ok(SyncOutcome::Downloaded)
    }

    fn downloads(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.downloading.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn in_download(&self, path: &Path) -> bool {
        self.downloads().contains(path)
    }

    fn track(&self, path: &Path, local: Option<DateTime<Utc>>, remote: Option<DateTime<Utc>>) {
        let mut registry = lock(&self.registry);
        if !registry.contains(path) && path.is_file() {
            match registry.ensure(path) {
                Ok(true) => tracing::info!("now tracking: {}", path.display()),
                Ok(false) => {}
                Err(err) => tracing::warn!("could not track {}: {err}", path.display()),
            }
        }
        registry.record_sync(path, local, remote);
    }

    fn notify_peer(&self, key: &str) {
        let peer = self.peer.read().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(peer) = peer {
            if let Err(err) = peer.notify_changed(key) {
                tracing::warn!("failed to notify peer about {key}: {err}");
            }
        }
    }
}
