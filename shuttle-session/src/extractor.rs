//! Open-file list and unsaved buffers of a running editor session.
//!
//! The editor persists its session as XML with one `<File filename="…"/>`
//! element per open tab. Unsaved tabs live as loose files in a backup
//! directory, named `<tab name>@<timestamp>`. Extraction never fails as a
//! whole: an unreadable session falls back to the caller's best-known list
//! and an unreadable backup directory yields no unsaved buffers.

use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use shuttle_core::{has_allowed_extension, ShuttleConfig};

use crate::error::{io_err, SessionError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where the open-file list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenFilesSource {
    SessionFile,
    /// Session unreadable or empty; the previous best-known list was used.
    Fallback,
}

/// An unsaved editor buffer copied into the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsavedBuffer {
    /// Tab name with the backup timestamp stripped (`notes.txt@2024…` → `notes.txt`).
    pub name: String,
    pub staged_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedSession {
    pub open_files: Vec<PathBuf>,
    pub unsaved: Vec<UnsavedBuffer>,
    pub source: OpenFilesSource,
    /// `true` when any part of the extraction hit an error and was skipped.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct SessionExtractor {
    session_file: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    staging_dir: PathBuf,
    extensions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

impl SessionExtractor {
    pub fn new(
        session_file: Option<PathBuf>,
        backup_dir: Option<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_file,
            backup_dir,
            staging_dir: staging_dir.into(),
            extensions: Vec::new(),
        }
    }

    /// Extractor for the configured editor. Expects resolved config paths.
    pub fn from_config(config: &ShuttleConfig) -> Self {
        Self::new(
            config.editor.session_file(),
            config.editor.backup_dir(),
            config.staging_dir.clone(),
        )
        .with_extensions(config.extensions.clone())
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Capture the session. `fallback` is used when the session file yields
    /// nothing.
    pub fn extract(&self, fallback: &BTreeSet<PathBuf>) -> ExtractedSession {
        let mut degraded = false;

        let from_session = match self.read_open_files() {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(error = %err, "could not read editor session");
                degraded = true;
                Vec::new()
            }
        };
        let (open_files, source) = if from_session.is_empty() {
            let files: Vec<PathBuf> = fallback
                .iter()
                .filter(|p| p.is_file() && has_allowed_extension(p, &self.extensions))
                .cloned()
                .collect();
            tracing::info!(count = files.len(), "using best-known file list");
            (files, OpenFilesSource::Fallback)
        } else {
            (from_session, OpenFilesSource::SessionFile)
        };

        let unsaved = match self.stage_unsaved() {
            Ok(unsaved) => unsaved,
            Err(err) => {
                tracing::warn!(error = %err, "could not stage unsaved buffers");
                degraded = true;
                Vec::new()
            }
        };

        tracing::info!(
            open = open_files.len(),
            unsaved = unsaved.len(),
            ?source,
            degraded,
            "session extracted"
        );
        ExtractedSession {
            open_files,
            unsaved,
            source,
            degraded,
        }
    }

    /// Existing, allow-listed files named by the session file, in session
    /// order without duplicates.
    pub fn read_open_files(&self) -> Result<Vec<PathBuf>, SessionError> {
        let path = self.session_file.as_ref().ok_or(SessionError::NoSessionFile)?;
        let xml = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(parse_session(&xml)
            .into_iter()
            .filter(|p| {
                let keep = p.is_file() && has_allowed_extension(p, &self.extensions);
                if !keep {
                    tracing::debug!(path = %p.display(), "skipping session entry");
                }
                keep
            })
            .collect())
    }

    /// Copy every backup file into the staging directory.
    pub fn stage_unsaved(&self) -> Result<Vec<UnsavedBuffer>, SessionError> {
        let Some(backup_dir) = &self.backup_dir else {
            return Ok(Vec::new());
        };
        let entries = match std::fs::read_dir(backup_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(dir = %backup_dir.display(), "backup directory does not exist");
                return Ok(Vec::new());
            }
            Err(err) => return Err(io_err(backup_dir, err)),
        };

        std::fs::create_dir_all(&self.staging_dir).map_err(|e| io_err(&self.staging_dir, e))?;

        let mut sources: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        sources.sort();

        let mut staged = Vec::with_capacity(sources.len());
        for source in sources {
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let dest = self.staging_dir.join(file_name);
            std::fs::copy(&source, &dest).map_err(|e| io_err(&dest, e))?;
            let name = buffer_name(&file_name.to_string_lossy());
            tracing::info!(name = %name, staged = %dest.display(), "staged unsaved buffer");
            staged.push(UnsavedBuffer {
                name,
                staged_path: dest,
            });
        }
        Ok(staged)
    }
}

// ---------------------------------------------------------------------------
// Session XML
// ---------------------------------------------------------------------------

fn file_entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<File\b[^>]*?\bfilename\s*=\s*"([^"]*)""#).expect("valid session regex")
    })
}

/// Every `<File filename="…"/>` path in `xml`, in order, deduplicated.
pub fn parse_session(xml: &str) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    file_entry_pattern()
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn buffer_name(backup_file_name: &str) -> String {
    match backup_file_name.split_once('@') {
        Some((name, _)) if !name.is_empty() => name.to_string(),
        _ => backup_file_name.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Staging cleanup
// ---------------------------------------------------------------------------

/// Remove staged buffers (files only). Returns how many were removed; a
/// missing directory counts as already clean.
pub fn cleanup_staging(staging_dir: &Path) -> Result<usize, SessionError> {
    let entries = match std::fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(io_err(staging_dir, err)),
    };
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() {
            std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            removed += 1;
        }
    }
    tracing::info!(removed, dir = %staging_dir.display(), "staging directory cleaned");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_entries_in_order_without_duplicates() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" ?>
<NotepadPlus>
    <Session activeView="0">
        <mainView activeIndex="1">
            <File firstVisibleLine="0" filename="C:\work\b.txt" encoding="-1" />
            <File filename="C:\work\a.py" />
            <File lang="None" filename="C:\work\b.txt" />
        </mainView>
        <subView activeIndex="0">
            <File filename="C:\work\R&amp;D notes.txt"/>
            <File filename="" />
        </subView>
    </Session>
</NotepadPlus>"#;

        assert_eq!(
            parse_session(xml),
            vec![
                PathBuf::from(r"C:\work\b.txt"),
                PathBuf::from(r"C:\work\a.py"),
                PathBuf::from(r"C:\work\R&D notes.txt"),
            ]
        );
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_session("not xml at all <File>").is_empty());
    }

    #[test]
    fn buffer_name_strips_backup_timestamp() {
        assert_eq!(buffer_name("notes.txt@2024-05-01_101010"), "notes.txt");
        assert_eq!(buffer_name("new 1@2024-05-01_101010"), "new 1");
        assert_eq!(buffer_name("plain.txt"), "plain.txt");
        assert_eq!(buffer_name("@odd"), "@odd");
    }
}
