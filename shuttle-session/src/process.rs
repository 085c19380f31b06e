//! Local process enumeration and termination.
//!
//! Names are compared case-insensitively (`Notepad++.exe` == `notepad++.exe`).

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

use crate::error::SessionError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateOutcome {
    Terminated,
    AlreadyGone,
    StillRunning,
}

pub trait ProcessTable: Send + Sync {
    /// Running processes, optionally restricted to an exact (case-insensitive)
    /// name. Sorted by pid.
    fn list(&self, name_filter: Option<&str>) -> Vec<ProcessInfo>;

    /// Ask `pid` to exit and wait up to `timeout` for it to go away.
    fn terminate(&self, pid: u32, timeout: Duration) -> Result<TerminateOutcome, SessionError>;

    /// Force-kill `pid`. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// Stopping a task
// ---------------------------------------------------------------------------

/// What happened to each process stopped by [`stop_processes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub terminated: Vec<u32>,
    pub already_gone: Vec<u32>,
    pub killed: Vec<u32>,
    /// Processes that survived the force-kill.
    pub kill_failed: Vec<u32>,
}

impl StopReport {
    pub fn stopped(&self) -> usize {
        self.terminated.len() + self.already_gone.len() + self.killed.len()
    }
}

/// Stop every process named `name`: graceful terminate, then force-kill
/// whatever is still running after `timeout`. Never fails; kill failures are
/// logged and reported.
pub fn stop_processes(table: &dyn ProcessTable, name: &str, timeout: Duration) -> StopReport {
    let mut report = StopReport::default();
    for process in table.list(Some(name)) {
        let pid = process.pid;
        let outcome = match table.terminate(pid, timeout) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(pid, error = %err, "terminate failed; escalating to kill");
                TerminateOutcome::StillRunning
            }
        };
        match outcome {
            TerminateOutcome::Terminated => {
                tracing::info!(pid, name, "process terminated");
                report.terminated.push(pid);
            }
            TerminateOutcome::AlreadyGone => {
                tracing::info!(pid, name, "process already gone");
                report.already_gone.push(pid);
            }
            TerminateOutcome::StillRunning => match table.kill(pid) {
                Ok(()) => {
                    tracing::warn!(pid, name, "process force-killed after {timeout:?}");
                    report.killed.push(pid);
                }
                Err(err) => {
                    tracing::error!(pid, name, error = %err, "force-kill failed");
                    report.kill_failed.push(pid);
                }
            },
        }
    }
    report
}

// ---------------------------------------------------------------------------
// sysinfo-backed table
// ---------------------------------------------------------------------------

/// [`ProcessTable`] over the host's real process list.
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl std::fmt::Debug for SystemProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProcessTable").finish_non_exhaustive()
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refreshed(&self, which: ProcessesToUpdate<'_>) -> MutexGuard<'_, System> {
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        system.refresh_processes(which, true);
        system
    }

    fn is_alive(&self, pid: Pid) -> bool {
        let system = self.refreshed(ProcessesToUpdate::Some(&[pid]));
        system
            .process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }
}

impl ProcessTable for SystemProcessTable {
    fn list(&self, name_filter: Option<&str>) -> Vec<ProcessInfo> {
        let system = self.refreshed(ProcessesToUpdate::All);
        let mut found: Vec<ProcessInfo> = system
            .processes()
            .values()
            .filter(|p| p.status() != ProcessStatus::Zombie)
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
            })
            .filter(|p| name_filter.map_or(true, |name| p.name.eq_ignore_ascii_case(name)))
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    fn terminate(&self, pid: u32, timeout: Duration) -> Result<TerminateOutcome, SessionError> {
        let target = Pid::from_u32(pid);
        {
            let system = self.refreshed(ProcessesToUpdate::Some(&[target]));
            let Some(process) = system.process(target) else {
                return Ok(TerminateOutcome::AlreadyGone);
            };
            if process.status() == ProcessStatus::Zombie {
                return Ok(TerminateOutcome::AlreadyGone);
            }
            // Platforms without SIGTERM only offer a hard kill.
            let delivered = process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill());
            if !delivered {
                return Err(SessionError::Signal { pid });
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(target) {
                return Ok(TerminateOutcome::Terminated);
            }
            if Instant::now() >= deadline {
                return Ok(TerminateOutcome::StillRunning);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill(&self, pid: u32) -> Result<(), SessionError> {
        let target = Pid::from_u32(pid);
        let system = self.refreshed(ProcessesToUpdate::Some(&[target]));
        match system.process(target) {
            None => Ok(()),
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(SessionError::Kill { pid }),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
