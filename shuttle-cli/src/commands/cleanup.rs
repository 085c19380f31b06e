//! `shuttle cleanup`: empty the unsaved-buffer staging directory.

use anyhow::{Context, Result};
use clap::Args;

use shuttle_session::cleanup_staging;

use super::{home_dir, load_config};

#[derive(Args, Debug)]
pub struct CleanupArgs {}

impl CleanupArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home)?;
        let removed = cleanup_staging(&config.staging_dir).with_context(|| {
            format!("failed to clean {}", config.staging_dir.display())
        })?;
        println!(
            "removed {removed} staged file(s) from {}",
            config.staging_dir.display()
        );
        Ok(())
    }
}
