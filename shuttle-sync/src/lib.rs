//! # shuttle-sync
//!
//! Blob sync engine: moves file content between local paths and the shared
//! blob store, choosing the direction from timestamps.
//!
//! Call [`SyncEngine::sync_one`] for a single file, [`SyncEngine::sync_all`]
//! for a batch, or [`SyncEngine::reconcile`] for a full bidirectional pass.

pub mod blob;
pub mod decision;
pub mod engine;
pub mod error;
pub mod notify;
pub mod writer;

pub use blob::{BlobRecord, BlobStore, FsBlobStore, MemoryBlobStore};
pub use decision::{decide, SyncDecision};
pub use engine::{FileReport, PassSummary, SyncEngine, SyncOutcome};
pub use error::SyncError;
pub use notify::ChangeNotifier;
