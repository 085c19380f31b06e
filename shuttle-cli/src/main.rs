//! Shuttle: move editor sessions between hosts over a shared blob store.
//!
//! # Usage
//!
//! ```text
//! shuttle track add|remove|list [<path>]
//! shuttle sync [<path>] [--direction auto|upload|download]
//! shuttle pull <key>
//! shuttle migrate <task> [--node <host[:port]>] [--sync-state]
//! shuttle tasks [--all]
//! shuttle node status [<host[:port]>]
//! shuttle daemon start|stop|status|logs
//! shuttle cleanup
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cleanup::CleanupArgs, daemon::DaemonCommand, migrate::MigrateArgs, node::NodeCommand,
    pull::PullArgs, sync::SyncArgs, tasks::TasksArgs, track::TrackCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "shuttle",
    version,
    about = "Migrate editor sessions and their files to another host",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the set of files kept in sync with the shared store.
    Track {
        #[command(subcommand)]
        command: TrackCommand,
    },

    /// Synchronize one tracked file, or all of them.
    Sync(SyncArgs),

    /// Download one blob from the shared store.
    Pull(PullArgs),

    /// Move a running task and its files to a worker node.
    Migrate(MigrateArgs),

    /// List local processes that can be migrated.
    Tasks(TasksArgs),

    /// Query worker nodes.
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Remove staged unsaved-buffer copies.
    Cleanup(CleanupArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Track { command } => commands::track::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Pull(args) => args.run(),
        Commands::Migrate(args) => args.run(),
        Commands::Tasks(args) => args.run(),
        Commands::Node { command } => commands::node::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Cleanup(args) => args.run(),
    }
}
