//! Size-based rotation of the daemon and agent log files.
//!
//! `agent.log` → `agent.log.1` → … → `agent.log.5`; the oldest copy is
//! dropped. Writers reopen the live file on every record, so a rotation
//! never strands an open handle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated copies kept per log.
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone)]
pub struct LogRotator {
    files: Vec<PathBuf>,
    max_bytes: u64,
    max_files: usize,
}

impl LogRotator {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            max_bytes: MAX_LOG_BYTES,
            max_files: MAX_ROTATED_FILES,
        }
    }

    pub fn with_limits(mut self, max_bytes: u64, max_files: usize) -> Self {
        self.max_bytes = max_bytes;
        self.max_files = max_files;
        self
    }

    /// Rotate every oversized file. Failures are logged per file.
    pub fn rotate_all(&self) -> usize {
        let mut rotated = 0;
        for path in &self.files {
            match rotate_if_needed(path, self.max_bytes, self.max_files) {
                Ok(true) => {
                    tracing::info!(path = %path.display(), "log file rotated");
                    rotated += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "log rotation failed")
                }
            }
        }
        rotated
    }

    /// Check sizes every `every` until shutdown.
    pub async fn run(
        self,
        every: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), crate::DaemonError> {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // no rotation at startup

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    let rotator = self.clone();
                    // Errors are logged inside rotate_all.
                    tokio::task::spawn_blocking(move || rotator.rotate_all()).await.ok();
                }
            }
        }
        Ok(())
    }
}

/// Rotate `log_path` once it reaches `max_bytes`. Returns `true` if it did.
/// A missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    fs::File::create(log_path)?;
    Ok(true)
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shuttle.log".to_string());
    base.with_file_name(format!("{name}.{n}"))
}
