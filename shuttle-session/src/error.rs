use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no editor session file configured")]
    NoSessionFile,

    #[error("could not signal process {pid}")]
    Signal { pid: u32 },

    #[error("could not kill process {pid}")]
    Kill { pid: u32 },

    #[error("editor did not save its session within {0:?}")]
    SaveTimeout(Duration),

    #[error("session save command {program} exited with {status}")]
    SaveCommand { program: String, status: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}
