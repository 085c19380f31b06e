//! `shuttle sync`: one-shot synchronization.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use shuttle_core::registry::lock;
use shuttle_core::SyncDirection;
use shuttle_daemon::{request_sync, DaemonError};
use shuttle_sync::{FileReport, PassSummary, SyncEngine};

use super::{home_dir, load_config, local_engine, print_json};

/// Arguments for `shuttle sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Tracked file to sync. Omit to sync every tracked file.
    pub path: Option<PathBuf>,

    /// auto (newer side wins), upload, or download.
    #[arg(long, default_value_t = SyncDirection::Auto)]
    pub direction: SyncDirection,

    /// Run in this process even when the daemon is up.
    #[arg(long)]
    pub local: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        if !self.local {
            match request_sync(&home, self.path.clone(), self.direction) {
                Ok(data) => return print_json(&data),
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon sync failed"),
            }
        }

        let config = load_config(&home)?;
        let engine = local_engine(&home, &config)?;
        match self.path {
            Some(path) => sync_file(&engine, &path, self.direction),
            None => sync_everything(&engine, self.direction),
        }
    }
}

fn sync_file(engine: &SyncEngine, path: &Path, direction: SyncDirection) -> Result<()> {
    let outcome = engine
        .sync_one(path, direction)
        .with_context(|| format!("sync failed for {}", path.display()))?;
    println!("{}: {}", path.display(), serde_json::json!(outcome));
    Ok(())
}

fn sync_everything(engine: &SyncEngine, direction: SyncDirection) -> Result<()> {
    let reports = match direction {
        SyncDirection::Auto => engine.reconcile().context("reconcile pass failed")?,
        direction => {
            let paths = lock(engine.registry()).snapshot();
            engine.sync_all(paths, direction)
        }
    };
    let summary = PassSummary::from_reports(&reports);
    print_failures(&reports);
    println!(
        "{} uploaded, {} downloaded, {} skipped, {} failed",
        summary.uploaded.to_string().green(),
        summary.downloaded.to_string().green(),
        summary.skipped,
        summary.failed.to_string().red()
    );
    if summary.failed > 0 {
        bail!("{} file(s) failed to sync", summary.failed);
    }
    Ok(())
}

fn print_failures(reports: &[FileReport]) {
    for report in reports {
        if let Err(err) = &report.outcome {
            eprintln!("{} {}: {err}", "failed".red(), report.path.display());
        }
    }
}
