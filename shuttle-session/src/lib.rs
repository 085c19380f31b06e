//! Local editor session capture.
//!
//! - [`process`]: enumerate and stop local processes ([`ProcessTable`])
//! - [`persister`]: ask the editor to flush its session ([`SessionPersister`])
//! - [`extractor`]: open-file list and unsaved buffers of a running session

pub mod error;
pub mod extractor;
pub mod persister;
pub mod process;

pub use error::SessionError;
pub use extractor::{
    cleanup_staging, parse_session, ExtractedSession, OpenFilesSource, SessionExtractor,
    UnsavedBuffer,
};
pub use persister::{
    persister_from_config, CommandPersister, NoopPersister, SaveOutcome, SessionPersister,
};
pub use process::{
    stop_processes, ProcessInfo, ProcessTable, StopReport, SystemProcessTable, TerminateOutcome,
};
