//! HTTP API of the worker agent.
//!
//! ```text
//! GET  /          banner
//! GET  /status    health + host memory          -> NodeStatus
//! GET  /tasks     tasks launched by this agent  -> [RunningTask]
//! POST /run_task  {"task"}                      -> RunTaskResponse
//! POST /sync      {"file"?}                     -> SyncResponse
//! POST /terminate_task {"task"?, "pid"?}        -> TerminateTaskResponse
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sysinfo::System;

use shuttle_core::api::{
    NodeStatus, RunTaskRequest, RunTaskResponse, RunningTask, SyncRequest, SyncResponse,
    TerminateTaskRequest, TerminateTaskResponse,
};
use shuttle_core::paths::is_tmp_artifact;
use shuttle_core::{has_allowed_extension, TaskName};
use shuttle_sync::{PassSummary, SyncEngine};

use crate::error::{io_err, AgentError};
use crate::launcher::{LaunchSpec, TaskLauncher};

#[derive(Clone)]
pub struct AgentState {
    engine: Arc<SyncEngine>,
    launcher: Arc<dyn TaskLauncher>,
    running: Arc<Mutex<BTreeMap<u32, RunningTask>>>,
    system: Arc<Mutex<System>>,
}

impl AgentState {
    pub fn new(engine: Arc<SyncEngine>, launcher: Arc<dyn TaskLauncher>) -> Self {
        Self {
            engine,
            launcher,
            running: Arc::new(Mutex::new(BTreeMap::new())),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Launched tasks that are still alive; exited ones are forgotten.
    pub fn running_tasks(&self) -> Vec<RunningTask> {
        let mut running = guard(&self.running);
        running.retain(|pid, _| self.launcher.is_running(*pid));
        running.values().cloned().collect()
    }

    /// Pull everything, then start `task` over the synced files.
    fn launch_with_synced_files(&self, task: TaskName) -> Result<RunTaskResponse, AgentError> {
        match self.engine.reconcile() {
            Ok(reports) => {
                let summary = PassSummary::from_reports(&reports);
                tracing::info!(
                    downloaded = summary.downloaded,
                    failed = summary.failed,
                    "pulled files before launch"
                );
            }
            Err(err) => tracing::warn!(error = %err, "pull before launch failed"),
        }

        let files = synced_files(self.engine.sync_dir(), self.engine.extensions())?;
        if files.is_empty() {
            tracing::info!(%task, "no files to open, nothing launched");
            return Ok(RunTaskResponse {
                task: task.0,
                file_count: 0,
                pid: None,
            });
        }

        let file_count = files.len();
        let handle = self.launcher.launch(&LaunchSpec {
            task: task.clone(),
            files,
        })?;
        guard(&self.running).insert(
            handle.pid,
            RunningTask {
                task: task.0.clone(),
                pid: handle.pid,
                file_count,
            },
        );
        Ok(RunTaskResponse {
            task: task.0,
            file_count,
            pid: Some(handle.pid),
        })
    }

    /// Stop launched tasks matching the request's name and/or pid.
    fn terminate(&self, request: &TerminateTaskRequest) -> Result<Vec<u32>, AgentError> {
        let target = match (&request.task, request.pid) {
            (Some(task), Some(pid)) => format!("{task} with pid {pid}"),
            (Some(task), None) => task.clone(),
            (None, Some(pid)) => format!("pid {pid}"),
            (None, None) => {
                return Err(AgentError::BadRequest("task or pid is required".to_string()))
            }
        };
        let targets: Vec<u32> = self
            .running_tasks()
            .into_iter()
            .filter(|running| request.pid.map_or(true, |pid| pid == running.pid))
            .filter(|running| {
                request
                    .task
                    .as_deref()
                    .map_or(true, |task| running.task.eq_ignore_ascii_case(task))
            })
            .map(|running| running.pid)
            .collect();
        if targets.is_empty() {
            return Err(AgentError::TaskNotRunning { target });
        }

        let mut terminated = Vec::new();
        for pid in targets {
            if self.launcher.terminate(pid)? {
                terminated.push(pid);
            }
            guard(&self.running).remove(&pid);
        }
        tracing::info!(%target, ?terminated, "tasks terminated");
        Ok(terminated)
    }
}

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/status", get(status))
        .route("/tasks", get(tasks))
        .route("/run_task", post(run_task))
        .route("/sync", post(sync))
        .route("/terminate_task", post(terminate_task))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn banner() -> Json<Value> {
    Json(json!({
        "message": "shuttle agent is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AgentState>) -> Json<NodeStatus> {
    let running_tasks = state.running_tasks().len();
    let (memory_total_bytes, memory_used_bytes) = {
        let mut system = guard(&state.system);
        system.refresh_memory();
        (system.total_memory(), system.used_memory())
    };
    Json(NodeStatus {
        status: "ok".to_string(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        memory_total_bytes,
        memory_used_bytes,
        running_tasks,
    })
}

async fn tasks(State(state): State<AgentState>) -> Json<Vec<RunningTask>> {
    Json(state.running_tasks())
}

async fn run_task(
    State(state): State<AgentState>,
    Json(request): Json<RunTaskRequest>,
) -> Result<Json<RunTaskResponse>, AgentError> {
    let task = TaskName(request.task);
    if !state.launcher.supports(&task) {
        return Err(AgentError::UnsupportedTask { task: task.0 });
    }
    tracing::info!(%task, "launch requested");
    let response = blocking(move || state.launch_with_synced_files(task)).await?;
    Ok(Json(response))
}

async fn sync(
    State(state): State<AgentState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AgentError> {
    let engine = state.engine.clone();
    let summary = blocking(move || match request.file {
        Some(key) => {
            tracing::info!(key = %key, "peer reported a change");
            let report = engine.pull(&key);
            let summary = PassSummary::from_reports(std::slice::from_ref(&report));
            report.outcome?;
            Ok(summary)
        }
        None => {
            let reports = engine.reconcile()?;
            Ok(PassSummary::from_reports(&reports))
        }
    })
    .await?;
    Ok(Json(SyncResponse {
        uploaded: summary.uploaded,
        downloaded: summary.downloaded,
        skipped: summary.skipped,
        failed: summary.failed,
    }))
}

async fn terminate_task(
    State(state): State<AgentState>,
    Json(request): Json<TerminateTaskRequest>,
) -> Result<Json<TerminateTaskResponse>, AgentError> {
    let terminated = blocking(move || state.terminate(&request)).await?;
    Ok(Json(TerminateTaskResponse { terminated }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Allow-listed regular files directly inside `dir`, sorted.
pub fn synced_files(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, AgentError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(dir, err)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
        if ty.is_file() && !is_tmp_artifact(&path) && has_allowed_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn blocking<T, F>(work: F) -> Result<T, AgentError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AgentError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AgentError::Join(format!("request task join failure: {err}")))?
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
