//! `shuttle-agent`: runs on a worker node.
//!
//! ```text
//! shuttle-agent [--home <dir>] [--bind <addr:port>]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "shuttle-agent",
    version,
    about = "Serve migrated tasks and mirror the shared file store on a worker node",
    long_about = None,
)]
struct Cli {
    /// Home directory holding `.shuttle/` (defaults to the user's home).
    #[arg(long)]
    home: Option<PathBuf>,

    /// Listen address; overrides `agent.bind` from the config.
    #[arg(long)]
    bind: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = match cli.home {
        Some(home) => home,
        None => dirs::home_dir().context("could not determine home directory")?,
    };
    shuttle_agent::start_blocking(&home, cli.bind).context("agent exited with an error")
}
