//! JSON bodies exchanged between a workstation and a worker agent over HTTP.
//!
//! | Route | Request | Response |
//! |---|---|---|
//! | `GET /status` | - | [`NodeStatus`] |
//! | `GET /tasks` | - | list of [`RunningTask`] |
//! | `POST /run_task` | [`RunTaskRequest`] | [`RunTaskResponse`] |
//! | `POST /sync` | [`SyncRequest`] | [`SyncResponse`] |
//! | `POST /terminate_task` | [`TerminateTaskRequest`] | [`TerminateTaskResponse`] |
//!
//! Failures answer with an [`ErrorBody`] and a non-2xx status.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub status: String,
    pub hostname: String,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub running_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub task: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskResponse {
    pub task: String,
    pub file_count: usize,
    /// `None` when there was nothing to open and no process was started.
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub task: String,
    pub pid: u32,
    pub file_count: usize,
}

/// `file: None` pulls every blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub uploaded: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Stop launched tasks by name, or one by pid. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateTaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateTaskResponse {
    /// Pids that were stopped, ascending.
    pub terminated: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
