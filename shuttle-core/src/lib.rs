//! Shuttle core library: domain types, tracked-file registry, configuration.
//!
//! - [`types`]: newtypes and domain structs shared by every crate
//! - [`api`]: HTTP bodies spoken between workstation and worker agent
//! - [`error`]: [`RegistryError`], [`ConfigError`]
//! - [`registry`]: the durable set of files under synchronization
//! - [`config`]: `~/.shuttle/config.yaml`
//! - [`paths`]: on-disk layout under `~/.shuttle/`

pub mod api;
pub mod config;
pub mod error;
pub mod paths;
pub mod registry;
pub mod types;

pub use config::ShuttleConfig;
pub use error::{ConfigError, RegistryError};
pub use registry::{SharedRegistry, TrackedFileRegistry};
pub use types::{
    blob_key, has_allowed_extension, MigrationRequest, NodeAddress, SyncDirection, TaskName,
    TrackedFile,
};
