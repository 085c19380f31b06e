//! Migration state machine.
//!
//! ```text
//! Idle → Extracting → Syncing → StoppingLocal → LaunchingRemote → Verifying → Completed
//!   └──────────┴──────────┴────────────┴───────────────┴──────────────┴──→ Failed{during}
//! ```
//!
//! Only three things end a migration early: the task is not running
//! locally, the node refuses the launch, or the node never reports ready.
//! Everything else (an unreadable session, a failed upload, a process that
//! will not die) is logged and the migration carries on.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use shuttle_core::registry::lock;
use shuttle_core::{blob_key, MigrationRequest, NodeAddress, ShuttleConfig, SyncDirection, TaskName};
use shuttle_session::{
    stop_processes, ExtractedSession, OpenFilesSource, ProcessTable, SessionExtractor,
    SessionPersister, StopReport, UnsavedBuffer,
};
use shuttle_sync::{ChangeNotifier, PassSummary, SyncEngine, SyncError};

use crate::error::{MigrationError, MigrationErrorKind};
use crate::prober::{Readiness, ReadinessProber};
use crate::remote::RemoteNode;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Non-terminal steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Extracting,
    Syncing,
    StoppingLocal,
    LaunchingRemote,
    Verifying,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Extracting),
            Phase::Extracting => Some(Phase::Syncing),
            Phase::Syncing => Some(Phase::StoppingLocal),
            Phase::StoppingLocal => Some(Phase::LaunchingRemote),
            Phase::LaunchingRemote => Some(Phase::Verifying),
            Phase::Verifying => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Extracting => "extracting",
            Phase::Syncing => "syncing",
            Phase::StoppingLocal => "stopping_local",
            Phase::LaunchingRemote => "launching_remote",
            Phase::Verifying => "verifying",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Active { phase: Phase },
    Completed,
    Failed { during: Phase },
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Active { phase } => phase.fmt(f),
            MigrationState::Completed => f.write_str("completed"),
            MigrationState::Failed { during } => write!(f, "failed({during})"),
        }
    }
}

/// One in-flight migration. Transitions are logged, never persisted.
struct Machine {
    task: TaskName,
    state: MigrationState,
}

impl Machine {
    fn new(task: &TaskName) -> Self {
        Self {
            task: task.clone(),
            state: MigrationState::Active { phase: Phase::Idle },
        }
    }

    fn phase(&self) -> Phase {
        match self.state {
            MigrationState::Active { phase } | MigrationState::Failed { during: phase } => phase,
            MigrationState::Completed => Phase::Verifying,
        }
    }

    fn enter(&mut self, to: Phase) {
        let from = self.phase();
        debug_assert_eq!(from.next(), Some(to), "illegal migration transition");
        self.transition(MigrationState::Active { phase: to });
    }

    fn complete(&mut self) {
        self.transition(MigrationState::Completed);
    }

    fn fail(&mut self, kind: MigrationErrorKind) -> MigrationError {
        let during = self.phase();
        self.transition(MigrationState::Failed { during });
        tracing::error!(task = %self.task, %during, error = %kind, "migration failed");
        MigrationError { during, kind }
    }

    fn transition(&mut self, to: MigrationState) {
        tracing::info!(task = %self.task, from = %self.state, to = %to, "migration state");
        self.state = to;
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub task: TaskName,
    pub node: NodeAddress,
    /// Files registered by this migration, in upload order.
    pub tracked: Vec<PathBuf>,
    pub uploaded: usize,
    pub failed_uploads: Vec<PathBuf>,
    pub session_source: Option<OpenFilesSource>,
    pub session_degraded: bool,
    pub stop: StopReport,
    pub probe_attempts: u32,
    pub state: MigrationState,
}

// ---------------------------------------------------------------------------
// Peer adapter
// ---------------------------------------------------------------------------

/// Routes the engine's upload notifications to a [`RemoteNode`].
pub struct PeerNotifier(pub Arc<dyn RemoteNode>);

impl ChangeNotifier for PeerNotifier {
    fn notify_changed(&self, key: &str) -> Result<(), SyncError> {
        self.0
            .notify_changed(key)
            .map_err(|e| SyncError::Notify(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct MigrationOrchestrator {
    engine: Arc<SyncEngine>,
    processes: Arc<dyn ProcessTable>,
    persister: Arc<dyn SessionPersister>,
    extractor: SessionExtractor,
    prober: ReadinessProber,
    stateful_editor: TaskName,
    stop_timeout: Duration,
    save_timeout: Duration,
}

impl fmt::Debug for MigrationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOrchestrator")
            .field("stateful_editor", &self.stateful_editor)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl MigrationOrchestrator {
    pub fn new(
        engine: Arc<SyncEngine>,
        processes: Arc<dyn ProcessTable>,
        persister: Arc<dyn SessionPersister>,
        extractor: SessionExtractor,
        prober: ReadinessProber,
    ) -> Self {
        Self {
            engine,
            processes,
            persister,
            extractor,
            prober,
            stateful_editor: TaskName::from("notepad++.exe"),
            stop_timeout: Duration::from_secs(5),
            save_timeout: Duration::from_secs(3),
        }
    }

    /// Orchestrator wired from resolved config.
    pub fn from_config(
        config: &ShuttleConfig,
        engine: Arc<SyncEngine>,
        processes: Arc<dyn ProcessTable>,
        persister: Arc<dyn SessionPersister>,
    ) -> Self {
        Self::new(
            engine,
            processes,
            persister,
            SessionExtractor::from_config(config),
            ReadinessProber::from_config(&config.probe),
        )
        .with_stateful_editor(TaskName::from(config.editor.process_name.as_str()))
        .with_timeouts(config.stop_timeout(), config.editor.save_timeout())
    }

    /// The task whose session (open files, unsaved buffers) is carried over
    /// when a migration asks for `sync_state`.
    pub fn with_stateful_editor(mut self, task: TaskName) -> Self {
        self.stateful_editor = task;
        self
    }

    pub fn with_timeouts(mut self, stop: Duration, save: Duration) -> Self {
        self.stop_timeout = stop;
        self.save_timeout = save;
        self
    }

    /// Run one migration to a terminal state.
    pub fn migrate(
        &self,
        request: &MigrationRequest,
        node: Arc<dyn RemoteNode>,
    ) -> Result<MigrationReport, MigrationError> {
        let task = &request.task_name;
        let mut machine = Machine::new(task);

        // 1. Idle → Extracting: the task must be running here.
        if self.processes.list(Some(&task.0)).is_empty() {
            return Err(machine.fail(MigrationErrorKind::TaskNotFound {
                task: task.0.clone(),
            }));
        }
        machine.enter(Phase::Extracting);

        // 2. Extracting
        let session = if request.sync_state && self.stateful_editor.matches(&task.0) {
            Some(self.extract())
        } else {
            tracing::info!(%task, "no session state to carry over");
            None
        };
        machine.enter(Phase::Syncing);

        // 3. Syncing
        let tracked = match &session {
            Some(session) => self.register(session),
            None => Vec::new(),
        };
        let reports = self
            .engine
            .sync_all(tracked.iter().cloned(), SyncDirection::ForceUpload);
        let summary = PassSummary::from_reports(&reports);
        let failed_uploads: Vec<PathBuf> = reports
            .into_iter()
            .filter(|r| r.outcome.is_err())
            .map(|r| r.path)
            .collect();
        tracing::info!(
            %task,
            uploaded = summary.uploaded,
            failed = summary.failed,
            "session files uploaded"
        );
        machine.enter(Phase::StoppingLocal);

        // 4. StoppingLocal
        let stop = stop_processes(self.processes.as_ref(), &task.0, self.stop_timeout);
        machine.enter(Phase::LaunchingRemote);

        // 5. LaunchingRemote
        match node.launch_task(task) {
            Ok(launched) => {
                tracing::info!(%task, node = %node.address().0, files = launched.file_count, "remote launch accepted");
            }
            Err(err) => return Err(machine.fail(MigrationErrorKind::Launch(err))),
        }
        machine.enter(Phase::Verifying);

        // 6. Verifying
        let probe_attempts = match self.prober.wait_until_ready(|| node.health_check()) {
            Readiness::Ready { attempts } => attempts,
            Readiness::TimedOut { attempts } => {
                return Err(machine.fail(MigrationErrorKind::NotReady { attempts }));
            }
        };
        machine.complete();

        // Uploads from here on are announced to the node.
        self.engine
            .set_peer(Some(Arc::new(PeerNotifier(node.clone()))));

        Ok(MigrationReport {
            task: task.clone(),
            node: node.address().clone(),
            tracked,
            uploaded: summary.uploaded,
            failed_uploads,
            session_source: session.as_ref().map(|s| s.source),
            session_degraded: session.as_ref().is_some_and(|s| s.degraded),
            stop,
            probe_attempts,
            state: machine.state,
        })
    }

    fn extract(&self) -> ExtractedSession {
        match self.persister.force_save(self.save_timeout) {
            Ok(outcome) => tracing::info!(?outcome, "editor session save requested"),
            Err(err) => tracing::warn!(error = %err, "editor session save failed; using last saved state"),
        }
        let known = lock(self.engine.registry()).snapshot();
        self.extractor.extract(&known)
    }

    /// Track every open file and recovered buffer. Returns the paths to
    /// upload, deduplicated in discovery order.
    fn register(&self, session: &ExtractedSession) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut tracked = Vec::new();

        for path in &session.open_files {
            if self.ensure_tracked(path) && seen.insert(path.clone()) {
                tracked.push(path.clone());
            }
        }
        for buffer in &session.unsaved {
            let Some(path) = self.place_unsaved(buffer, &session.open_files) else {
                continue;
            };
            if self.ensure_tracked(&path) && seen.insert(path.clone()) {
                tracked.push(path);
            }
        }
        tracked
    }

    fn ensure_tracked(&self, path: &Path) -> bool {
        match lock(self.engine.registry()).ensure(path) {
            Ok(added) => {
                if added {
                    tracing::info!(path = %path.display(), "tracking session file");
                }
                true
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not track session file");
                false
            }
        }
    }

    /// An unsaved buffer whose name matches an open or tracked file stands
    /// for that file. Otherwise its staged copy is materialized in the sync
    /// directory under a name that does not overwrite anything.
    fn place_unsaved(&self, buffer: &UnsavedBuffer, open_files: &[PathBuf]) -> Option<PathBuf> {
        let matched = open_files
            .iter()
            .find(|p| blob_key(p).as_deref() == Some(buffer.name.as_str()))
            .cloned()
            .or_else(|| lock(self.engine.registry()).find_by_key(&buffer.name));
        if let Some(path) = matched {
            tracing::info!(buffer = %buffer.name, path = %path.display(), "unsaved buffer matches open file");
            return Some(path);
        }

        let sync_dir = self.engine.sync_dir();
        if let Err(err) = std::fs::create_dir_all(sync_dir) {
            tracing::warn!(dir = %sync_dir.display(), error = %err, "could not create sync directory");
            return None;
        }
        let dest = non_clobbering_path(sync_dir, &buffer.name);
        match std::fs::copy(&buffer.staged_path, &dest) {
            Ok(_) => {
                tracing::info!(buffer = %buffer.name, path = %dest.display(), "materialized unsaved buffer");
                Some(dest)
            }
            Err(err) => {
                tracing::warn!(buffer = %buffer.name, error = %err, "could not materialize unsaved buffer");
                None
            }
        }
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first `n` not taken.
fn non_clobbering_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = as_path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
