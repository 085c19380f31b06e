//! Worker-side agent.
//!
//! Serves the HTTP API a workstation migrates tasks through, and mirrors the
//! shared blob store into the local sync directory in both directions.

pub mod error;
pub mod launcher;
pub mod runtime;
pub mod server;

pub use error::AgentError;
pub use launcher::{CommandLauncher, LaunchHandle, LaunchSpec, TaskLauncher};
pub use runtime::{run, serve, start_blocking};
pub use server::{router, AgentState};
