//! `shuttle node`: worker node queries.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use shuttle_core::api::TerminateTaskRequest;
use shuttle_core::NodeAddress;
use shuttle_migrate::{HttpRemoteNode, RemoteNode};

use super::{home_dir, load_config, print_json};

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Health and memory of a worker node.
    Status {
        /// `host` or `host:port`. Defaults to `node.address` from the config.
        address: Option<String>,

        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Stop a task the node launched, e.g. after a migration that never
    /// became ready.
    Stop {
        /// Process name of the task.
        #[arg(required_unless_present = "pid")]
        task: Option<String>,

        /// Stop only this pid on the node.
        #[arg(long)]
        pid: Option<u32>,

        /// `host` or `host:port`. Defaults to `node.address` from the config.
        #[arg(long)]
        node: Option<String>,
    },
}

pub fn run(command: NodeCommand) -> Result<()> {
    let home = home_dir()?;
    let config = load_config(&home)?;

    let resolve = |address: Option<String>| {
        address
            .map(NodeAddress::from)
            .or_else(|| config.node.address.clone())
            .ok_or_else(|| anyhow!("no node given and node.address is not configured"))
    };

    match command {
        NodeCommand::Status { address, json } => {
            let node = HttpRemoteNode::from_config(resolve(address)?, &config);
            let status = node
                .health_check()
                .with_context(|| format!("node {} is unreachable", node.base_url()))?;

            if json {
                return print_json(&serde_json::to_value(&status)?);
            }
            let mib = |bytes: u64| bytes / (1024 * 1024);
            println!("{} {}", node.base_url().bold(), status.status.green());
            println!("  host:    {}", status.hostname);
            println!(
                "  memory:  {} / {} MiB used",
                mib(status.memory_used_bytes),
                mib(status.memory_total_bytes)
            );
            println!("  tasks:   {}", status.running_tasks);
        }
        NodeCommand::Stop { task, pid, node } => {
            let node = HttpRemoteNode::from_config(resolve(node)?, &config);
            let response = node
                .terminate_task(&TerminateTaskRequest { task, pid })
                .with_context(|| format!("failed to stop task on {}", node.base_url()))?;
            let pids: Vec<String> = response.terminated.iter().map(u32::to_string).collect();
            println!(
                "stopped {} task(s) on {}{}",
                response.terminated.len().to_string().bold(),
                node.base_url(),
                if pids.is_empty() {
                    String::new()
                } else {
                    format!(" (pid {})", pids.join(", "))
                }
            );
        }
    }
    Ok(())
}
