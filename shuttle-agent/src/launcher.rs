//! Starting migrated tasks on the worker.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use shuttle_core::TaskName;

use crate::error::AgentError;

/// What to start: the task and the files it should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub task: TaskName,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchHandle {
    pub pid: u32,
}

pub trait TaskLauncher: Send + Sync {
    fn supports(&self, task: &TaskName) -> bool;

    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchHandle, AgentError>;

    /// `false` once the launched process has exited.
    fn is_running(&self, pid: u32) -> bool;

    /// Stop a launched process. `Ok(false)` if it had already exited.
    fn terminate(&self, pid: u32) -> Result<bool, AgentError>;
}

/// Runs the executable configured for a task with the files as arguments.
#[derive(Debug, Default)]
pub struct CommandLauncher {
    programs: BTreeMap<String, PathBuf>,
    children: Mutex<HashMap<u32, Child>>,
}

impl CommandLauncher {
    pub fn new(programs: BTreeMap<String, PathBuf>) -> Self {
        Self {
            programs,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn program(&self, task: &TaskName) -> Option<&PathBuf> {
        self.programs
            .iter()
            .find(|(name, _)| task.matches(name))
            .map(|(_, program)| program)
    }
}

impl TaskLauncher for CommandLauncher {
    fn supports(&self, task: &TaskName) -> bool {
        self.program(task).is_some()
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<LaunchHandle, AgentError> {
        let program = self
            .program(&spec.task)
            .ok_or_else(|| AgentError::UnsupportedTask {
                task: spec.task.0.clone(),
            })?;
        let child = Command::new(program)
            .args(&spec.files)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AgentError::Launch {
                task: spec.task.0.clone(),
                source,
            })?;

        let pid = child.id();
        tracing::info!(
            task = %spec.task,
            program = %program.display(),
            files = spec.files.len(),
            pid,
            "task launched"
        );
        self.children
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pid, child);
        Ok(LaunchHandle { pid })
    }

    fn is_running(&self, pid: u32) -> bool {
        let mut children = self.children.lock().unwrap_or_else(|p| p.into_inner());
        let Some(child) = children.get_mut(&pid) else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(pid, %status, "launched task exited");
                children.remove(&pid);
                false
            }
            Err(err) => {
                tracing::warn!(pid, error = %err, "cannot poll launched task");
                false
            }
        }
    }

    fn terminate(&self, pid: u32) -> Result<bool, AgentError> {
        let child = self
            .children
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&pid);
        let Some(mut child) = child else {
            return Ok(false);
        };
        if child.try_wait().map_err(|e| stop_err(pid, e))?.is_some() {
            return Ok(false);
        }
        child.kill().map_err(|e| stop_err(pid, e))?;
        let status = child.wait().map_err(|e| stop_err(pid, e))?;
        tracing::info!(pid, %status, "launched task terminated");
        Ok(true)
    }
}

fn stop_err(pid: u32, source: std::io::Error) -> AgentError {
    AgentError::Terminate { pid, source }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(program: &str) -> CommandLauncher {
        CommandLauncher::new(BTreeMap::from([(
            "Editor.exe".to_string(),
            PathBuf::from(program),
        )]))
    }

    #[test]
    fn task_names_match_case_insensitively() {
        let launcher = launcher("/bin/true");
        assert!(launcher.supports(&TaskName::from("editor.EXE")));
        assert!(!launcher.supports(&TaskName::from("browser.exe")));
    }

    #[test]
    fn unknown_task_is_rejected() {
        let err = launcher("/bin/true")
            .launch(&LaunchSpec {
                task: TaskName::from("browser.exe"),
                files: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedTask { .. }));
    }

    #[test]
    fn missing_executable_is_a_launch_error() {
        let err = launcher("/nonexistent/editor")
            .launch(&LaunchSpec {
                task: TaskName::from("editor.exe"),
                files: vec![PathBuf::from("a.txt")],
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::Launch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn launched_process_is_tracked_until_it_exits() {
        let launcher = launcher("/bin/sleep");
        let handle = launcher
            .launch(&LaunchSpec {
                task: TaskName::from("editor.exe"),
                files: vec![PathBuf::from("0.2")],
            })
            .expect("launch");
        assert!(launcher.is_running(handle.pid));

        std::thread::sleep(std::time::Duration::from_millis(600));
        assert!(!launcher.is_running(handle.pid));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_kills_a_running_task_once() {
        let launcher = launcher("/bin/sleep");
        let handle = launcher
            .launch(&LaunchSpec {
                task: TaskName::from("editor.exe"),
                files: vec![PathBuf::from("30")],
            })
            .expect("launch");

        assert!(launcher.terminate(handle.pid).expect("terminate"));
        assert!(!launcher.is_running(handle.pid));
        assert!(!launcher.terminate(handle.pid).expect("second terminate"));
    }
}
