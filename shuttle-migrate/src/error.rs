//! Error types for shuttle-migrate.

use thiserror::Error;

use crate::orchestrator::Phase;

/// Failures talking to a worker node.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not reach {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{url} answered HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

/// Terminal failure of a migration, tagged with the step it failed in.
#[derive(Debug, Error)]
#[error("migration failed during {during}: {kind}")]
pub struct MigrationError {
    pub during: Phase,
    #[source]
    pub kind: MigrationErrorKind,
}

#[derive(Debug, Error)]
pub enum MigrationErrorKind {
    #[error("no running process named '{task}'")]
    TaskNotFound { task: String },

    #[error("remote launch failed: {0}")]
    Launch(#[source] RemoteError),

    #[error("node not ready after {attempts} health checks")]
    NotReady { attempts: u32 },
}
