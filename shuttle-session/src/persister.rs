//! Forcing the editor to write its session file before it is read.

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use shuttle_core::config::EditorConfig;

use crate::error::{io_err, SessionError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOutcome {
    Saved,
    /// The editor offers no way to request a save; the session file on disk
    /// is used as-is.
    Unsupported,
}

pub trait SessionPersister: Send + Sync {
    fn force_save(&self, timeout: Duration) -> Result<SaveOutcome, SessionError>;
}

/// Persister for editors without a save hook.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersister;

impl SessionPersister for NoopPersister {
    fn force_save(&self, _timeout: Duration) -> Result<SaveOutcome, SessionError> {
        Ok(SaveOutcome::Unsupported)
    }
}

/// Runs `editor.save_command` and waits for it to exit successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPersister {
    program: String,
    args: Vec<String>,
}

impl CommandPersister {
    /// `None` for an empty command line.
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SessionPersister for CommandPersister {
    fn force_save(&self, timeout: Duration) -> Result<SaveOutcome, SessionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| io_err(&self.program, e))?;
        let deadline = Instant::now() + timeout;

        loop {
            match child.try_wait().map_err(|e| io_err(&self.program, e))? {
                Some(status) if status.success() => return Ok(SaveOutcome::Saved),
                Some(status) => {
                    return Err(SessionError::SaveCommand {
                        program: self.program.clone(),
                        status: status.to_string(),
                    })
                }
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SessionError::SaveTimeout(timeout));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }
}

/// [`CommandPersister`] when a save command is configured, else [`NoopPersister`].
pub fn persister_from_config(editor: &EditorConfig) -> Arc<dyn SessionPersister> {
    match CommandPersister::new(&editor.save_command) {
        Some(persister) => Arc::new(persister),
        None => Arc::new(NoopPersister),
    }
}
