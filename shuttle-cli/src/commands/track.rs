//! `shuttle track`: manage the tracked file registry.
//!
//! Goes through the daemon when it is running so its in-memory registry and
//! watches stay current; otherwise edits the registry file directly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shuttle_core::registry::lock;
use shuttle_core::{SyncDirection, TrackedFile, TrackedFileRegistry};
use shuttle_daemon::{request_list, request_track, request_untrack, DaemonError};

use super::{home_dir, load_config, local_engine};

#[derive(Subcommand, Debug)]
pub enum TrackCommand {
    /// Start tracking a file and push its current content.
    Add {
        /// File to track.
        path: PathBuf,
    },
    /// Stop tracking a file. The file and its blob are left alone.
    Remove {
        /// Tracked file to forget.
        path: PathBuf,
    },
    /// Show tracked files.
    List,
}

#[derive(Tabled)]
struct TrackedRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
}

pub fn run(command: TrackCommand) -> Result<()> {
    let home = home_dir()?;
    match command {
        TrackCommand::Add { path } => add(&home, path),
        TrackCommand::Remove { path } => remove(&home, path),
        TrackCommand::List => list(&home),
    }
}

fn add(home: &Path, path: PathBuf) -> Result<()> {
    match request_track(home, path.clone()) {
        Ok(data) => {
            println!("tracking {}", data["tracked"].as_str().unwrap_or_default());
            if let Some(error) = data["sync"]["error"].as_str() {
                println!("{} initial sync failed: {error}", "warning:".yellow());
            }
            return Ok(());
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {}
        Err(err) => return Err(err).context("daemon refused to track the file"),
    }

    let config = load_config(home)?;
    let engine = local_engine(home, &config)?;
    let tracked = lock(engine.registry())
        .add(&path)
        .with_context(|| format!("cannot track {}", path.display()))?
        .path
        .clone();
    println!("tracking {}", tracked.display());

    match engine.sync_one(&tracked, SyncDirection::Auto) {
        Ok(outcome) => println!("initial sync: {}", serde_json::json!(outcome)),
        Err(err) => println!("{} initial sync failed: {err}", "warning:".yellow()),
    }
    Ok(())
}

fn remove(home: &Path, path: PathBuf) -> Result<()> {
    match request_untrack(home, path.clone()) {
        Ok(data) => {
            println!(
                "no longer tracking {}",
                data["untracked"].as_str().unwrap_or_default()
            );
            return Ok(());
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {}
        Err(err) => return Err(err).context("daemon refused to untrack the file"),
    }

    let mut registry = TrackedFileRegistry::open_at(home).context("failed to open registry")?;
    let removed = registry
        .remove(&path)
        .with_context(|| format!("cannot untrack {}", path.display()))?;
    println!("no longer tracking {}", removed.path.display());
    Ok(())
}

fn list(home: &Path) -> Result<()> {
    let files: Vec<TrackedFile> = match request_list(home) {
        Ok(data) => serde_json::from_value(data["files"].clone())
            .context("daemon returned an invalid file list")?,
        Err(DaemonError::DaemonNotRunning { .. }) => TrackedFileRegistry::open_at(home)
            .context("failed to open registry")?
            .iter()
            .cloned()
            .collect(),
        Err(err) => return Err(err).context("failed to list tracked files"),
    };

    if files.is_empty() {
        println!("no tracked files");
        return Ok(());
    }

    let rows: Vec<TrackedRow> = files
        .iter()
        .map(|file| TrackedRow {
            key: file.key().unwrap_or_default(),
            path: file.path.display().to_string(),
            last_sync: file
                .last_known_local_mtime
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!("{} tracked file(s)", files.len().to_string().bold());
    Ok(())
}
