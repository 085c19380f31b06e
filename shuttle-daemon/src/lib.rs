//! Workstation daemon: keeps tracked files synchronized and answers the
//! local control socket.
//!
//! - [`watcher`]: debounced uploads on file changes
//! - [`reconciler`]: periodic full passes that never overlap
//! - [`runtime`]: task wiring and the socket server
//! - [`protocol`]: client side of the socket protocol

pub mod error;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod protocol;
pub mod reconciler;
pub mod runtime;
pub mod watcher;

pub use error::DaemonError;
pub use protocol::{
    request_list, request_migrate, request_status, request_stop, request_sync, request_track,
    request_untrack, send_request, DaemonRequest, DaemonResponse,
};
pub use reconciler::{Reconciler, ReconcilerStatus, TickGate};
pub use runtime::{open_engine, run, serve, start_blocking, DaemonState};
pub use watcher::{ChangeWatcher, Debouncer, WatcherSettings};
