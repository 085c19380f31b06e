//! Error types for shuttle-sync.

use std::path::PathBuf;

use thiserror::Error;

use shuttle_core::RegistryError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the tracked file registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Blob metadata sidecar could not be (de)serialized.
    #[error("blob metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blob not found: {key}")]
    BlobNotFound { key: String },

    #[error("local file not found: {path}")]
    LocalMissing { path: PathBuf },

    /// Neither side has the file.
    #[error("nothing to sync for {path}: missing locally and in the store")]
    Missing { path: PathBuf },

    #[error("invalid blob key '{key}'")]
    InvalidKey { key: String },

    #[error("path has no file name: {path}")]
    NoKey { path: PathBuf },

    #[error("peer notification failed: {0}")]
    Notify(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
