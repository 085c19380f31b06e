use std::path::{Path, PathBuf};
use std::time::Duration;

use shuttle_core::paths::shuttle_root;

/// How often the watcher looks for parent directories of newly tracked files.
pub const REWATCH_INTERVAL: Duration = Duration::from_secs(10);
pub const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

pub const DAEMON_LOG: &str = "daemon.log";
pub const AGENT_LOG: &str = "agent.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    shuttle_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    shuttle_root(home).join("logs")
}

pub fn daemon_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}

pub fn agent_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(AGENT_LOG)
}
