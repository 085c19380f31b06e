use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use shuttle_core::config;
use shuttle_daemon::log_rotation::LogRotator;
use shuttle_daemon::logging::init_tracing;
use shuttle_daemon::paths::{agent_log_path, LOG_ROTATION_INTERVAL};
use shuttle_daemon::runtime::ensure_runtime_dirs;
use shuttle_daemon::{open_engine, ChangeWatcher, Reconciler, WatcherSettings};

use crate::error::{io_err, AgentError};
use crate::launcher::CommandLauncher;
use crate::server::{router, AgentState};

/// Start the agent and block the current thread until it exits.
pub fn start_blocking(home: &Path, bind: Option<String>) -> Result<(), AgentError> {
    ensure_runtime_dirs(home)?;
    init_tracing(Some(&agent_log_path(home)));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), bind))
}

/// Mirror the shared store into the sync directory and serve the HTTP API.
pub async fn run(home: PathBuf, bind: Option<String>) -> Result<(), AgentError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let engine = open_engine(&home, &config)?;
    let launcher = Arc::new(CommandLauncher::new(config.agent.launchers.clone()));
    let state = AgentState::new(engine.clone(), launcher);

    let bind = bind.unwrap_or_else(|| config.agent.bind.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| io_err(&bind, e))?;
    tracing::info!(
        %bind,
        sync_dir = %engine.sync_dir().display(),
        store = %config.store_dir.display(),
        "agent starting"
    );

    let settings = WatcherSettings::from_config(&config).with_auto_track(true);
    let reconciler = Reconciler::new(engine.clone(), config.reconcile_interval());
    let rotator = LogRotator::new(vec![agent_log_path(&home)]);
    serve(listener, state, settings, reconciler, rotator).await
}

/// HTTP server, auto-tracking watcher, reconciler, log rotation and the
/// signal handler, stopped together.
pub async fn serve(
    listener: TcpListener,
    state: AgentState,
    settings: WatcherSettings,
    reconciler: Reconciler,
    rotator: LogRotator,
) -> Result<(), AgentError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let http_handle = {
        let shutdown = shutdown_tx.clone();
        let mut rx = shutdown.subscribe();
        let app = router(state.clone());
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await
                .map_err(|e| io_err("agent http server", e));
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let watcher = ChangeWatcher::new(state.engine().clone(), settings);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher.run(rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let reconciler_handle = {
        let shutdown = shutdown_tx.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = reconciler.run(rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
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
                            tracing::info!("received ctrl-c, shutting down agent");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(io_err("ctrl-c handler", err)),
                    }
                }
            }
        })
    };

    let (http_result, watcher_result, reconciler_result, rotation_result, signal_result) = tokio::join!(
        http_handle,
        watcher_handle,
        reconciler_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("http_server", http_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("reconciler", reconciler_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("agent stopped");
    Ok(())
}

fn handle_join<E>(
    task: &str,
    result: Result<Result<(), E>, tokio::task::JoinError>,
) -> Result<(), AgentError>
where
    AgentError: From<E>,
{
    match result {
        Ok(inner) => inner.map_err(AgentError::from),
        Err(err) => Err(AgentError::Join(format!("{task} task join failure: {err}"))),
    }
}
