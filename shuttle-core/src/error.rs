//! Error types for shuttle-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from tracked-file registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path is already part of the registry.
    #[error("already tracked: {path}")]
    AlreadyTracked { path: PathBuf },

    /// The path does not reference an existing regular file.
    #[error("not an existing file: {path}")]
    InvalidPath { path: PathBuf },

    /// Not UTF-8, or contains a line break: the record is one path per line.
    #[error("path cannot be stored in the registry record: {path:?}")]
    Unrecordable { path: PathBuf },

    /// The path is not part of the registry.
    #[error("not tracked: {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.shuttle/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors raised while loading `~/.shuttle/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
