//! `shuttle tasks`: local processes that can be migrated.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shuttle_session::{ProcessInfo, ProcessTable, SystemProcessTable};

use super::{home_dir, load_config};

/// Arguments for `shuttle tasks`.
#[derive(Args, Debug)]
pub struct TasksArgs {
    /// List every process, not only the configured watch list.
    #[arg(long)]
    pub all: bool,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "pid")]
    pid: u32,
    #[tabled(rename = "task")]
    name: String,
}

impl TasksArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = load_config(&home)?;
        let table = SystemProcessTable::new();

        let mut processes: Vec<ProcessInfo> = table
            .list(None)
            .into_iter()
            .filter(|p| {
                self.all
                    || config
                        .watch_list
                        .iter()
                        .any(|watched| watched.eq_ignore_ascii_case(&p.name))
            })
            .collect();
        processes.sort_by(|a, b| a.name.cmp(&b.name).then(a.pid.cmp(&b.pid)));

        if processes.is_empty() {
            println!(
                "no migratable tasks running (watching: {})",
                config.watch_list.join(", ")
            );
            return Ok(());
        }

        let count = processes.len();
        let rows: Vec<TaskRow> = processes
            .into_iter()
            .map(|p| TaskRow {
                pid: p.pid,
                name: p.name,
            })
            .collect();
        let mut rendered = Table::new(rows);
        rendered.with(Style::rounded());
        println!("{rendered}");
        println!("{} task(s)", count.to_string().bold());
        Ok(())
    }
}
