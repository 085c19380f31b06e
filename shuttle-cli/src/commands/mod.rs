pub mod cleanup;
pub mod daemon;
pub mod migrate;
pub mod node;
pub mod pull;
pub mod sync;
pub mod tasks;
pub mod track;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use shuttle_core::{config, ShuttleConfig};
use shuttle_sync::SyncEngine;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_config(home: &std::path::Path) -> Result<ShuttleConfig> {
    config::load_at(home).context("failed to load ~/.shuttle/config.yaml")
}

/// A sync engine over the configured store, for commands that run without
/// the daemon.
pub(crate) fn local_engine(home: &std::path::Path, config: &ShuttleConfig) -> Result<Arc<SyncEngine>> {
    shuttle_daemon::open_engine(home, config).context("failed to open the shared store")
}

pub(crate) fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
