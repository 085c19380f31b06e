//! # shuttle-migrate
//!
//! Moves a running task to a worker node:
//!
//! 1. [`orchestrator`] drives the migration state machine
//! 2. [`remote`] talks to the worker's agent ([`RemoteNode`])
//! 3. [`prober`] polls the worker until it reports ready

pub mod error;
pub mod orchestrator;
pub mod prober;
pub mod remote;

pub use error::{MigrationError, MigrationErrorKind, RemoteError};
pub use orchestrator::{
    MigrationOrchestrator, MigrationReport, MigrationState, PeerNotifier, Phase,
};
pub use prober::{Readiness, ReadinessProber, Sleeper, ThreadSleeper};
pub use remote::{HttpRemoteNode, RemoteNode};
