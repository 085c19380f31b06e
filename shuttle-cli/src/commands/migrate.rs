//! `shuttle migrate`: move a running task to a worker node.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use shuttle_core::{MigrationRequest, NodeAddress, TaskName};
use shuttle_daemon::{request_migrate, DaemonError};
use shuttle_migrate::{HttpRemoteNode, MigrationOrchestrator};
use shuttle_session::{persister_from_config, SystemProcessTable};

use super::{home_dir, load_config, local_engine, print_json};

/// Arguments for `shuttle migrate`.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Process name of the task, e.g. `notepad++.exe`.
    pub task: String,

    /// Worker node as `host` or `host:port`. Defaults to `node.address`
    /// from the config.
    #[arg(long)]
    pub node: Option<String>,

    /// Carry the editor session over: open files and unsaved buffers.
    #[arg(long)]
    pub sync_state: bool,

    /// Run in this process even when the daemon is up.
    #[arg(long)]
    pub local: bool,

    /// Print the full migration report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl MigrateArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home)?;
        let node = self
            .node
            .map(NodeAddress::from)
            .or_else(|| config.node.address.clone())
            .ok_or_else(|| anyhow!("no target node: pass --node or set node.address in the config"))?;
        let request = MigrationRequest {
            task_name: TaskName::from(self.task),
            target_node: node,
            sync_state: self.sync_state,
        };

        let report = if self.local {
            None
        } else {
            match request_migrate(&home, &request) {
                Ok(report) => Some(report),
                Err(DaemonError::DaemonNotRunning { .. }) => None,
                Err(err) => return Err(err).context("migration failed"),
            }
        };
        let report = match report {
            Some(report) => report,
            None => {
                let engine = local_engine(&home, &config)?;
                let orchestrator = MigrationOrchestrator::from_config(
                    &config,
                    engine,
                    Arc::new(SystemProcessTable::new()),
                    persister_from_config(&config.editor),
                );
                let node = Arc::new(HttpRemoteNode::from_config(
                    request.target_node.clone(),
                    &config,
                ));
                let report = orchestrator.migrate(&request, node)?;
                serde_json::to_value(report).context("failed to encode migration report")?
            }
        };

        if self.json {
            return print_json(&report);
        }
        print_summary(&report);
        Ok(())
    }
}

fn print_summary(report: &Value) {
    println!(
        "{} {} -> {}",
        "migrated".green().bold(),
        report["task"].as_str().unwrap_or_default(),
        report["node"].as_str().unwrap_or_default()
    );
    println!(
        "  files uploaded: {}",
        report["uploaded"].as_u64().unwrap_or_default()
    );
    if let Some(failed) = report["failed_uploads"].as_array().filter(|f| !f.is_empty()) {
        for path in failed {
            println!("  {} {}", "upload failed:".yellow(), path.as_str().unwrap_or_default());
        }
    }
    if report["session_degraded"].as_bool() == Some(true) {
        println!(
            "  {} session file unreadable, used last known open files",
            "warning:".yellow()
        );
    }
    let stopped = ["terminated", "already_gone", "killed"]
        .iter()
        .filter_map(|field| report["stop"][field].as_array())
        .map(Vec::len)
        .sum::<usize>();
    println!("  local processes stopped: {stopped}");
    if let Some(survivors) = report["stop"]["kill_failed"].as_array().filter(|s| !s.is_empty()) {
        println!(
            "  {} {} process(es) could not be stopped",
            "warning:".yellow(),
            survivors.len()
        );
    }
    println!(
        "  node ready after {} health check(s)",
        report["probe_attempts"].as_u64().unwrap_or_default()
    );
}
