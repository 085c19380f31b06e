//! `~/.shuttle/config.yaml`: every field is optional.
//!
//! Relative paths and `~/` prefixes are resolved against the home directory
//! passed to [`load_at`]; empty paths fall back to the defaults in
//! [`crate::paths`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;
use crate::types::NodeAddress;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    /// Root of the shared blob store (a directory on a shared mount).
    pub store_dir: PathBuf,
    /// Where downloaded blobs without a tracked path are materialized.
    pub sync_dir: PathBuf,
    /// Where unsaved editor buffers are staged before upload.
    pub staging_dir: PathBuf,
    /// File extensions eligible for synchronization.
    pub extensions: Vec<String>,
    pub debounce_ms: u64,
    pub reconcile_interval_secs: u64,
    pub stop_timeout_secs: u64,
    pub editor: EditorConfig,
    pub node: NodeConfig,
    pub probe: ProbeConfig,
    pub timeouts: TimeoutConfig,
    pub agent: AgentConfig,
    /// Process names offered by `shuttle tasks`.
    pub watch_list: Vec<String>,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::new(),
            sync_dir: PathBuf::new(),
            staging_dir: PathBuf::new(),
            extensions: ["txt", "cpp", "py", "html"].map(String::from).to_vec(),
            debounce_ms: 2_000,
            reconcile_interval_secs: 30,
            stop_timeout_secs: 5,
            editor: EditorConfig::default(),
            node: NodeConfig::default(),
            probe: ProbeConfig::default(),
            timeouts: TimeoutConfig::default(),
            agent: AgentConfig::default(),
            watch_list: ["notepad++.exe", "chrome.exe", "Code.exe"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// The stateful editor whose session is captured before migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub process_name: String,
    /// The editor's own data directory (watched for temp-then-rename saves).
    pub data_dir: Option<PathBuf>,
    /// Session file listing open buffers; defaults to `<data_dir>/session.xml`.
    pub session_file: Option<PathBuf>,
    /// Unsaved-buffer backups; defaults to `<data_dir>/backup`.
    pub backup_dir: Option<PathBuf>,
    /// Program and arguments that make the editor flush its session file.
    /// Empty means the editor has no save hook.
    pub save_command: Vec<String>,
    pub save_timeout_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            process_name: "notepad++.exe".to_string(),
            data_dir: None,
            session_file: None,
            backup_dir: None,
            save_command: Vec::new(),
            save_timeout_ms: 3_000,
        }
    }
}

impl EditorConfig {
    pub fn session_file(&self) -> Option<PathBuf> {
        self.session_file
            .clone()
            .or_else(|| self.data_dir.as_ref().map(|d| d.join("session.xml")))
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.backup_dir
            .clone()
            .or_else(|| self.data_dir.as_ref().map(|d| d.join("backup")))
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }
}

/// The counterpart node (workstation side) or peer (agent side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub address: Option<NodeAddress>,
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 180,
            interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub status_secs: u64,
    pub launch_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_secs: 5,
            launch_secs: 30,
        }
    }
}

/// Worker-side settings used by `shuttle-agent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub bind: String,
    /// Task name → executable launched with the synced files as arguments.
    pub launchers: BTreeMap<String, PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            launchers: BTreeMap::new(),
        }
    }
}

impl ShuttleConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Fill empty paths with defaults and anchor relative ones at `home`.
    pub fn resolve_paths(mut self, home: &Path) -> Self {
        self.store_dir = resolve_or(home, &self.store_dir, paths::default_store_dir(home));
        self.sync_dir = resolve_or(home, &self.sync_dir, paths::default_sync_dir(home));
        self.staging_dir = resolve_or(home, &self.staging_dir, paths::default_staging_dir(home));
        self.editor.data_dir = self.editor.data_dir.map(|p| expand(home, &p));
        self.editor.session_file = self.editor.session_file.map(|p| expand(home, &p));
        self.editor.backup_dir = self.editor.backup_dir.map(|p| expand(home, &p));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.probe.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "probe.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Load `<home>/.shuttle/config.yaml`; a missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<ShuttleConfig, ConfigError> {
    let path = paths::config_path(home);
    let config = if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        if contents.trim().is_empty() {
            ShuttleConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path, source })?
        }
    } else {
        ShuttleConfig::default()
    };
    config.validate()?;
    Ok(config.resolve_paths(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ShuttleConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

fn resolve_or(home: &Path, path: &Path, default: PathBuf) -> PathBuf {
    if path.as_os_str().is_empty() {
        default
    } else {
        expand(home, path)
    }
}

fn expand(home: &Path, path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        home.join(rest)
    } else if path.is_relative() {
        home.join(path)
    } else {
        path.to_path_buf()
    }
}
