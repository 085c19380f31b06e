//! End-to-end migrations against in-memory collaborators.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use shuttle_core::api::{NodeStatus, RunTaskResponse, TerminateTaskRequest, TerminateTaskResponse};
use shuttle_core::registry::lock;
use shuttle_core::{MigrationRequest, NodeAddress, SyncDirection, TaskName, TrackedFileRegistry};
use shuttle_migrate::{
    MigrationErrorKind, MigrationOrchestrator, MigrationState, Phase, ReadinessProber,
    RemoteError, RemoteNode, Sleeper,
};
use shuttle_session::{
    NoopPersister, ProcessInfo, ProcessTable, SessionError, SessionExtractor, TerminateOutcome,
};
use shuttle_sync::{MemoryBlobStore, SyncEngine};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeProcesses {
    running: Mutex<BTreeMap<u32, String>>,
}

impl FakeProcesses {
    fn with(entries: &[(u32, &str)]) -> Arc<Self> {
        let table = Self::default();
        for (pid, name) in entries {
            table.running.lock().unwrap().insert(*pid, name.to_string());
        }
        Arc::new(table)
    }

    fn names(&self) -> Vec<String> {
        self.running.lock().unwrap().values().cloned().collect()
    }
}

impl ProcessTable for FakeProcesses {
    fn list(&self, name_filter: Option<&str>) -> Vec<ProcessInfo> {
        self.running
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, name)| name_filter.map_or(true, |f| name.eq_ignore_ascii_case(f)))
            .map(|(pid, name)| ProcessInfo {
                pid: *pid,
                name: name.clone(),
            })
            .collect()
    }

    fn terminate(&self, pid: u32, _timeout: Duration) -> Result<TerminateOutcome, SessionError> {
        Ok(match self.running.lock().unwrap().remove(&pid) {
            Some(_) => TerminateOutcome::Terminated,
            None => TerminateOutcome::AlreadyGone,
        })
    }

    fn kill(&self, pid: u32) -> Result<(), SessionError> {
        self.running.lock().unwrap().remove(&pid);
        Ok(())
    }
}

struct FakeNode {
    address: NodeAddress,
    failures_before_ready: u32,
    health_calls: AtomicU32,
    reject_launch: bool,
    launched: Mutex<Vec<String>>,
    notified: Mutex<Vec<String>>,
}

impl FakeNode {
    fn new(failures_before_ready: u32) -> Self {
        Self {
            address: NodeAddress::from("10.0.0.9"),
            failures_before_ready,
            health_calls: AtomicU32::new(0),
            reject_launch: false,
            launched: Mutex::new(Vec::new()),
            notified: Mutex::new(Vec::new()),
        }
    }
}

impl RemoteNode for FakeNode {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    fn launch_task(&self, task: &TaskName) -> Result<RunTaskResponse, RemoteError> {
        if self.reject_launch {
            return Err(RemoteError::Status {
                url: "http://10.0.0.9:5000/run_task".into(),
                status: 400,
                body: "unsupported task".into(),
            });
        }
        self.launched.lock().unwrap().push(task.0.clone());
        Ok(RunTaskResponse {
            task: task.0.clone(),
            file_count: 2,
            pid: Some(7),
        })
    }

    fn health_check(&self) -> Result<NodeStatus, RemoteError> {
        let call = self.health_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures_before_ready {
            return Err(RemoteError::Transport {
                url: "http://10.0.0.9:5000/status".into(),
                message: "connection refused".into(),
            });
        }
        Ok(NodeStatus {
            status: "ok".into(),
            hostname: "worker".into(),
            memory_total_bytes: 1,
            memory_used_bytes: 0,
            running_tasks: 1,
        })
    }

    fn notify_changed(&self, key: &str) -> Result<(), RemoteError> {
        self.notified.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn terminate_task(
        &self,
        request: &TerminateTaskRequest,
    ) -> Result<TerminateTaskResponse, RemoteError> {
        let mut launched = self.launched.lock().unwrap();
        let before = launched.len();
        if let Some(task) = &request.task {
            launched.retain(|name| !name.eq_ignore_ascii_case(task));
        }
        let terminated = if launched.len() < before { vec![7] } else { vec![] };
        Ok(TerminateTaskResponse { terminated })
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Workstation {
    home: TempDir,
    store: Arc<MemoryBlobStore>,
    engine: Arc<SyncEngine>,
    processes: Arc<FakeProcesses>,
}

impl Workstation {
    fn new(running: &[(u32, &str)]) -> Self {
        let home = TempDir::new().expect("home");
        let store = Arc::new(MemoryBlobStore::new());
        let registry = TrackedFileRegistry::open_at(home.path())
            .expect("registry")
            .into_shared();
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            registry,
            home.path().join("sync"),
        ));
        Self {
            home,
            store,
            engine,
            processes: FakeProcesses::with(running),
        }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.home.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn session(&self, files: &[&PathBuf]) {
        let entries: String = files
            .iter()
            .map(|f| format!("<File filename=\"{}\" />\n", f.display()))
            .collect();
        self.write(
            "editor/session.xml",
            &format!("<NotepadPlus><Session><mainView>\n{entries}</mainView></Session></NotepadPlus>"),
        );
    }

    fn orchestrator(&self, max_attempts: u32) -> MigrationOrchestrator {
        let extractor = SessionExtractor::new(
            Some(self.home.path().join("editor/session.xml")),
            Some(self.home.path().join("editor/backup")),
            self.home.path().join("staging"),
        )
        .with_extensions(vec!["txt".into()]);
        let prober = ReadinessProber::new(max_attempts, Duration::from_secs(10))
            .with_sleeper(Arc::new(NoSleep));
        MigrationOrchestrator::new(
            self.engine.clone(),
            self.processes.clone(),
            Arc::new(NoopPersister),
            extractor,
            prober,
        )
        .with_stateful_editor(TaskName::from("editor.exe"))
        .with_timeouts(Duration::from_millis(10), Duration::from_millis(10))
    }
}

fn request(sync_state: bool) -> MigrationRequest {
    MigrationRequest {
        task_name: TaskName::from("Editor.exe"),
        target_node: NodeAddress::from("10.0.0.9"),
        sync_state,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn stateful_migration_uploads_each_file_once_and_completes() {
    let ws = Workstation::new(&[(42, "editor.exe"), (43, "other.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    let b = ws.write("work/b.txt", "beta");
    ws.session(&[&a, &b]);
    let node = Arc::new(FakeNode::new(3));

    let report = ws
        .orchestrator(180)
        .migrate(&request(true), node.clone())
        .expect("migration");

    assert_eq!(report.state, MigrationState::Completed);
    assert_eq!(report.tracked, vec![a.clone(), b.clone()]);
    assert_eq!(report.uploaded, 2);
    assert_eq!(ws.store.put_count(), 2, "exactly one upload per file");
    assert_eq!(ws.store.content("a.txt").as_deref(), Some(&b"alpha"[..]));
    assert_eq!(report.probe_attempts, 4);
    assert_eq!(report.stop.terminated, vec![42]);
    assert_eq!(ws.processes.names(), vec!["other.exe".to_string()]);
    assert_eq!(*node.launched.lock().unwrap(), vec!["Editor.exe".to_string()]);

    let registry = lock(ws.engine.registry());
    assert!(registry.contains(&a) && registry.contains(&b));
}

#[test]
fn completed_migration_points_uploads_at_the_node() {
    let ws = Workstation::new(&[(42, "editor.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    ws.session(&[&a]);
    let node = Arc::new(FakeNode::new(0));

    ws.orchestrator(5)
        .migrate(&request(true), node.clone())
        .expect("migration");
    assert!(node.notified.lock().unwrap().is_empty(), "no peer during migration");

    std::fs::write(&a, "alpha, edited").unwrap();
    ws.engine
        .sync_one(&a, SyncDirection::ForceUpload)
        .expect("upload");
    assert_eq!(*node.notified.lock().unwrap(), vec!["a.txt".to_string()]);
}

#[test]
fn unsaved_buffers_are_matched_or_materialized() {
    let ws = Workstation::new(&[(42, "editor.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    ws.write("editor/backup/a.txt@2024-05-01_101010", "alpha, unsaved");
    ws.write("editor/backup/new 1@2024-05-01_101010", "scratch");
    ws.session(&[&a]);

    let report = ws
        .orchestrator(1)
        .migrate(&request(true), Arc::new(FakeNode::new(0)))
        .expect("migration");

    let scratch = ws.home.path().join("sync").join("new 1");
    assert_eq!(report.tracked, vec![a, scratch.clone()]);
    assert_eq!(std::fs::read_to_string(&scratch).unwrap(), "scratch");
    assert_eq!(ws.store.put_count(), 2);
}

#[test]
fn never_ready_fails_during_verifying_and_leaves_remote_running() {
    let ws = Workstation::new(&[(42, "editor.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    ws.session(&[&a]);
    let node = Arc::new(FakeNode::new(u32::MAX));

    let err = ws
        .orchestrator(3)
        .migrate(&request(true), node.clone())
        .unwrap_err();

    assert_eq!(err.during, Phase::Verifying);
    assert!(matches!(err.kind, MigrationErrorKind::NotReady { attempts: 3 }));
    assert_eq!(node.health_calls.load(Ordering::SeqCst), 3);
    assert_eq!(node.launched.lock().unwrap().len(), 1);
    assert!(ws.processes.names().is_empty(), "local task was still stopped");

    // The caller owns cleanup of the remote copy.
    let stopped = node
        .terminate_task(&TerminateTaskRequest {
            task: Some("Editor.exe".into()),
            pid: None,
        })
        .expect("terminate");
    assert_eq!(stopped.terminated, vec![7]);
    assert!(node.launched.lock().unwrap().is_empty());
}

#[test]
fn missing_task_fails_in_idle_without_side_effects() {
    let ws = Workstation::new(&[(43, "other.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    ws.session(&[&a]);
    let node = Arc::new(FakeNode::new(0));

    let err = ws
        .orchestrator(3)
        .migrate(&request(true), node.clone())
        .unwrap_err();

    assert_eq!(err.during, Phase::Idle);
    assert!(matches!(err.kind, MigrationErrorKind::TaskNotFound { .. }));
    assert_eq!(ws.store.put_count(), 0);
    assert!(lock(ws.engine.registry()).is_empty());
    assert!(node.launched.lock().unwrap().is_empty());
    assert_eq!(ws.processes.names(), vec!["other.exe".to_string()]);
}

#[test]
fn rejected_launch_fails_during_launching_remote() {
    let ws = Workstation::new(&[(42, "editor.exe")]);
    let mut node = FakeNode::new(0);
    node.reject_launch = true;

    let err = ws
        .orchestrator(3)
        .migrate(&request(false), Arc::new(node))
        .unwrap_err();

    assert_eq!(err.during, Phase::LaunchingRemote);
    assert!(matches!(
        err.kind,
        MigrationErrorKind::Launch(RemoteError::Status { status: 400, .. })
    ));
}

#[test]
fn stateless_migration_moves_the_process_only() {
    let ws = Workstation::new(&[(42, "editor.exe")]);
    let a = ws.write("work/a.txt", "alpha");
    ws.session(&[&a]);

    let report = ws
        .orchestrator(3)
        .migrate(&request(false), Arc::new(FakeNode::new(0)))
        .expect("migration");

    assert!(report.tracked.is_empty());
    assert_eq!(report.session_source, None);
    assert_eq!(ws.store.put_count(), 0);
    assert_eq!(report.state, MigrationState::Completed);
}
