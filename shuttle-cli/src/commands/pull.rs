//! `shuttle pull`: fetch one blob by key.

use anyhow::{Context, Result};
use clap::Args;

use super::{home_dir, load_config, local_engine};

/// Arguments for `shuttle pull`.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Blob key (the file's base name), e.g. `notes.txt`.
    pub key: String,
}

impl PullArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home)?;
        let engine = local_engine(&home, &config)?;

        let report = engine.pull(&self.key);
        report
            .outcome
            .with_context(|| format!("failed to pull '{}'", self.key))?;
        println!("pulled {} -> {}", self.key, report.path.display());
        Ok(())
    }
}
