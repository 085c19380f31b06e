use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, its loops and the socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("registry error: {0}")]
    Registry(#[from] shuttle_core::RegistryError),

    #[error("config error: {0}")]
    Config(#[from] shuttle_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] shuttle_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("a reconcile pass is already running")]
    PassInProgress,

    #[error(transparent)]
    Migration(#[from] shuttle_migrate::MigrationError),

    /// A migration the daemon ran failed; `during` is the phase it failed in.
    #[error("{message}")]
    MigrationFailed { during: String, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
