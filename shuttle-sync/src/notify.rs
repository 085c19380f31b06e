//! Counterpart notification after a successful upload.

use crate::error::SyncError;

/// Tells the other host that a blob key changed so it can refresh eagerly
/// instead of waiting for its next periodic pass. Best-effort.
pub trait ChangeNotifier: Send + Sync {
    fn notify_changed(&self, key: &str) -> Result<(), SyncError>;
}
