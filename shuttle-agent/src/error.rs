use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use shuttle_core::api::ErrorBody;
use shuttle_daemon::DaemonError;
use shuttle_sync::SyncError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported task: {task}")]
    UnsupportedTask { task: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no launched task matches {target}")]
    TaskNotRunning { target: String },

    #[error("failed to launch {task}: {source}")]
    Launch {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop pid {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("config error: {0}")]
    Config(#[from] shuttle_core::ConfigError),

    #[error("{0}")]
    Join(String),
}

impl AgentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::UnsupportedTask { .. } | AgentError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentError::TaskNotRunning { .. } => StatusCode::NOT_FOUND,
            AgentError::Sync(SyncError::InvalidKey { .. } | SyncError::NoKey { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AgentError::Sync(SyncError::BlobNotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}
