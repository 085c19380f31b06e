//! `tracing` setup shared by the daemon and the agent.
//!
//! Records go to stderr and, when a log file is given, are appended to it.
//! `RUST_LOG` overrides the default `info` filter; `SHUTTLE_LOG_JSON=1`
//! switches to JSON lines. Records emitted through the `log` facade are
//! bridged into the same subscriber.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

/// Opens the log file in append mode for every record.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: PathBuf,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub enum LogSink {
    File(File),
    Discard,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(file) => file.write(buf),
            LogSink::Discard => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(file) => file.flush(),
            LogSink::Discard => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for AppendLog {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(LogSink::File)
            .unwrap_or(LogSink::Discard)
    }
}

pub fn init_tracing(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var_os("SHUTTLE_LOG_JSON").is_some_and(|v| v == "1");

    let _ = match (log_file, json) {
        (Some(path), false) => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(io::stderr.and(AppendLog::new(path)))
            .try_init(),
        (Some(path), true) => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr.and(AppendLog::new(path)))
            .try_init(),
        (None, false) => fmt().with_env_filter(filter).with_target(false).try_init(),
        (None, true) => fmt().json().with_env_filter(filter).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_log_appends_across_writers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.log");
        let make = AppendLog::new(&path);

        make.make_writer().write_all(b"one\n").unwrap();
        make.make_writer().write_all(b"two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn unwritable_log_is_discarded() {
        let dir = TempDir::new().unwrap();
        let make = AppendLog::new(dir.path().join("missing-dir/daemon.log"));
        assert!(matches!(make.make_writer(), LogSink::Discard));
    }
}
