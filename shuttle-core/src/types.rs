//! Domain types shared across the Shuttle crates.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Process image name of a local task, e.g. `notepad++.exe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskName(pub String);

impl TaskName {
    /// Process names are compared case-insensitively.
    pub fn matches(&self, process_name: &str) -> bool {
        self.0.eq_ignore_ascii_case(process_name)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Address of a remote worker node: `host` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    /// `http://host:port`: `default_port` applies when the address has none.
    pub fn base_url(&self, default_port: u16) -> String {
        let raw = self
            .0
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if raw.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            format!("http://{raw}")
        } else {
            format!("http://{raw}:{default_port}")
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for NodeAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeAddress {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which way a sync call may move content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Decide from timestamps: newer side wins, equal means consistent.
    #[default]
    Auto,
    ForceUpload,
    ForceDownload,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Auto => write!(f, "auto"),
            SyncDirection::ForceUpload => write!(f, "force-upload"),
            SyncDirection::ForceDownload => write!(f, "force-download"),
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "upload" | "force-upload" => Ok(Self::ForceUpload),
            "download" | "force-download" => Ok(Self::ForceDownload),
            other => Err(format!(
                "unknown sync direction '{other}'; expected: auto, upload, download"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A file under synchronization.
///
/// Only `path` is durable; the timestamps are what the engine observed on its
/// last successful transfer in this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_local_mtime: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_remote_mtime: Option<DateTime<Utc>>,
}

impl TrackedFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_known_local_mtime: None,
            last_known_remote_mtime: None,
        }
    }

    /// Blob key for this file (its base name).
    pub fn key(&self) -> Option<String> {
        blob_key(&self.path)
    }
}

/// Input to the migration orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub task_name: TaskName,
    pub target_node: NodeAddress,
    #[serde(default)]
    pub sync_state: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Blob keys are file base names; files in different directories with the
/// same name share one key.
pub fn blob_key(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// `true` when `path` has one of `extensions` (compared without the dot,
/// case-insensitively). An empty allow-list admits everything.
pub fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
