use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};

use shuttle_core::registry::lock;
use shuttle_core::{
    config, MigrationRequest, NodeAddress, ShuttleConfig, SyncDirection, TaskName,
    TrackedFileRegistry,
};
use shuttle_migrate::{HttpRemoteNode, MigrationOrchestrator, PeerNotifier};
use shuttle_session::{persister_from_config, SystemProcessTable};
use shuttle_sync::{FsBlobStore, PassSummary, SyncEngine};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::LogRotator;
use crate::logging::init_tracing;
use crate::paths::{
    agent_log_path, daemon_log_path, logs_dir, socket_path, LOG_ROTATION_INTERVAL,
};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reconciler::Reconciler;
use crate::watcher::{ChangeWatcher, WatcherSettings};

/// Everything a socket client can reach.
#[derive(Clone)]
pub struct DaemonState {
    home: PathBuf,
    config: Arc<ShuttleConfig>,
    engine: Arc<SyncEngine>,
    reconciler: Reconciler,
    migration: Arc<Mutex<()>>,
    started_at_unix: u64,
}

impl DaemonState {
    pub fn new(home: PathBuf, config: ShuttleConfig, engine: Arc<SyncEngine>) -> Self {
        let reconciler = Reconciler::new(engine.clone(), config.reconcile_interval());
        Self {
            home,
            config: Arc::new(config),
            engine,
            reconciler,
            migration: Arc::new(Mutex::new(())),
            started_at_unix: unix_seconds_now(),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}

/// Engine over the configured store and `home`'s registry. Uploads notify the
/// configured node when one is set.
pub fn open_engine(home: &Path, config: &ShuttleConfig) -> Result<Arc<SyncEngine>, DaemonError> {
    let registry = TrackedFileRegistry::open_at(home)?.into_shared();
    let store = Arc::new(FsBlobStore::new(&config.store_dir));
    let mut engine = SyncEngine::new(store, registry, &config.sync_dir)
        .with_extensions(config.extensions.clone());
    if let Some(address) = &config.node.address {
        let node = HttpRemoteNode::from_config(address.clone(), config);
        engine = engine.with_peer(Arc::new(PeerNotifier(Arc::new(node))));
    }
    Ok(Arc::new(engine))
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(Some(&daemon_log_path(home)));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let engine = open_engine(&home, &config)?;
    tracing::info!(
        home = %home.display(),
        store = %config.store_dir.display(),
        tracked = lock(engine.registry()).len(),
        "daemon starting"
    );
    let settings = WatcherSettings::from_config(&config);
    let state = DaemonState::new(home, config, engine);
    serve(state, settings).await
}

/// Run watcher, reconciler, socket server, log rotation and the signal
/// handler until one of them asks for shutdown.
pub async fn serve(state: DaemonState, settings: WatcherSettings) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let watcher = ChangeWatcher::new(state.engine.clone(), settings);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher.run(rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let reconciler_handle = {
        let shutdown = shutdown_tx.clone();
        let reconciler = state.reconciler.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = reconciler.run(rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let rotator = LogRotator::new(vec![
            daemon_log_path(&state.home),
            agent_log_path(&state.home),
        ]);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = rotator.run(LOG_ROTATION_INTERVAL, rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, reconciler_result, socket_result, rotation_result, signal_result) = tokio::join!(
        watcher_handle,
        reconciler_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("reconciler", reconciler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    state: DaemonState,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: DaemonState,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = if stop {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            match dispatch(&state, request).await {
                Ok(data) => DaemonResponse::ok(data),
                Err(err) => DaemonResponse::from_error(&err),
            }
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Execute one non-`stop` command.
pub async fn dispatch(state: &DaemonState, request: DaemonRequest) -> Result<Value, DaemonError> {
    match request.cmd.as_str() {
        "status" => Ok(build_status_payload(state).await),
        "list" => {
            let files: Vec<_> = lock(state.engine.registry()).iter().cloned().collect();
            Ok(json!({ "files": files }))
        }
        "track" => {
            let path = required(request.path, "path")?;
            track(state, path).await
        }
        "untrack" => {
            let path = required(request.path, "path")?;
            let engine = state.engine.clone();
            let removed = blocking("untrack", move || {
                lock(engine.registry()).remove(&path).map_err(DaemonError::from)
            })
            .await?;
            tracing::info!(path = %removed.path.display(), "untracked");
            Ok(json!({ "untracked": removed.path }))
        }
        "sync" => sync(state, request.path, request.direction.unwrap_or_default()).await,
        "migrate" => {
            let migration = MigrationRequest {
                task_name: TaskName(required(request.task, "task")?),
                target_node: NodeAddress(required(request.node, "node")?),
                sync_state: request.sync_state.unwrap_or(false),
            };
            migrate(state, migration).await
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

async fn track(state: &DaemonState, path: PathBuf) -> Result<Value, DaemonError> {
    let engine = state.engine.clone();
    blocking("track", move || {
        let tracked = lock(engine.registry()).add(&path)?.path.clone();
        tracing::info!(path = %tracked.display(), "tracked");
        let initial = match engine.sync_one(&tracked, SyncDirection::Auto) {
            Ok(outcome) => json!(outcome),
            Err(err) => json!({ "error": err.to_string() }),
        };
        Ok(json!({ "tracked": tracked, "sync": initial }))
    })
    .await
}

async fn sync(
    state: &DaemonState,
    path: Option<PathBuf>,
    direction: SyncDirection,
) -> Result<Value, DaemonError> {
    match (path, direction) {
        (Some(path), direction) => {
            let engine = state.engine.clone();
            blocking("sync", move || {
                let outcome = engine.sync_one(&path, direction)?;
                Ok(json!({ "path": path, "outcome": outcome }))
            })
            .await
        }
        (None, SyncDirection::Auto) => {
            let summary = state.reconciler.run_now().await?;
            Ok(json!(summary))
        }
        (None, direction) => {
            let engine = state.engine.clone();
            blocking("sync", move || {
                let targets = lock(engine.registry()).snapshot();
                let reports = engine.sync_all(targets, direction);
                Ok(json!(PassSummary::from_reports(&reports)))
            })
            .await
        }
    }
}

async fn migrate(state: &DaemonState, request: MigrationRequest) -> Result<Value, DaemonError> {
    let Ok(_running) = state.migration.try_lock() else {
        return Err(DaemonError::Protocol(
            "a migration is already running".to_string(),
        ));
    };

    let config = state.config.clone();
    let engine = state.engine.clone();
    blocking("migrate", move || {
        let node = Arc::new(HttpRemoteNode::from_config(
            request.target_node.clone(),
            &config,
        ));
        let orchestrator = MigrationOrchestrator::from_config(
            &config,
            engine,
            Arc::new(SystemProcessTable::new()),
            persister_from_config(&config.editor),
        );
        let report = orchestrator.migrate(&request, node)?;
        Ok(json!(report))
    })
    .await
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let tracked = lock(state.engine.registry()).len();
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "tracked": tracked,
        "store_dir": state.config.store_dir,
        "sync_dir": state.engine.sync_dir(),
        "node": state.config.node.address,
        "socket": socket_path(&state.home),
        "reconciler": state.reconciler.status().await,
    })
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, DaemonError> {
    value.ok_or_else(|| DaemonError::Protocol(format!("missing field '{field}'")))
}

async fn blocking<T, F>(label: &'static str, work: F) -> Result<T, DaemonError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DaemonError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| DaemonError::Protocol(format!("{label} task join error: {err}")))?
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

pub fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

pub fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
