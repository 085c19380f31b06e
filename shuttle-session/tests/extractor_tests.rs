//! Session extraction against a fake editor data directory.

use std::collections::BTreeSet;
use std::path::PathBuf;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use shuttle_session::{cleanup_staging, OpenFilesSource, SessionExtractor};

struct EditorDir {
    home: assert_fs::TempDir,
}

impl EditorDir {
    fn new() -> Self {
        Self {
            home: assert_fs::TempDir::new().expect("tempdir"),
        }
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let child = self.home.child(name);
        child.write_str(content).expect("write");
        child.path().to_path_buf()
    }

    fn session(&self, files: &[&PathBuf]) {
        let mut xml = String::from("<NotepadPlus><Session><mainView>\n");
        for f in files {
            xml.push_str(&format!("<File filename=\"{}\" />\n", f.display()));
        }
        xml.push_str("</mainView></Session></NotepadPlus>\n");
        self.home.child("editor/session.xml").write_str(&xml).expect("session");
    }

    fn extractor(&self) -> SessionExtractor {
        SessionExtractor::new(
            Some(self.home.path().join("editor/session.xml")),
            Some(self.home.path().join("editor/backup")),
            self.home.path().join("staging"),
        )
        .with_extensions(vec!["txt".into(), "py".into()])
    }
}

#[test]
fn session_file_lists_existing_allowed_files_only() {
    let dir = EditorDir::new();
    let a = dir.file("work/a.txt", "a");
    let b = dir.file("work/b.py", "b");
    let image = dir.file("work/logo.png", "png");
    let gone = dir.home.path().join("work/deleted.txt");
    dir.session(&[&b, &image, &gone, &a, &b]);

    let session = dir.extractor().extract(&BTreeSet::new());

    assert_eq!(session.source, OpenFilesSource::SessionFile);
    assert_eq!(session.open_files, vec![b, a]);
    assert!(!session.degraded);
}

#[test]
fn missing_session_falls_back_to_best_known_list() {
    let dir = EditorDir::new();
    let a = dir.file("work/a.txt", "a");
    let vanished = dir.home.path().join("work/vanished.txt");
    let fallback = BTreeSet::from([a.clone(), vanished]);

    let session = dir.extractor().extract(&fallback);

    assert_eq!(session.source, OpenFilesSource::Fallback);
    assert_eq!(session.open_files, vec![a]);
    assert!(session.degraded, "unreadable session is reported");
}

#[test]
fn empty_session_falls_back_without_degrading() {
    let dir = EditorDir::new();
    let a = dir.file("work/a.txt", "a");
    dir.session(&[]);

    let session = dir.extractor().extract(&BTreeSet::from([a.clone()]));
    assert_eq!(session.source, OpenFilesSource::Fallback);
    assert_eq!(session.open_files, vec![a]);
    assert!(!session.degraded);
}

#[test]
fn unsaved_buffers_are_staged_with_clean_names() {
    let dir = EditorDir::new();
    dir.file("editor/backup/new 1@2024-05-01_101010", "scratch");
    dir.file("editor/backup/a.txt@2024-05-01_101500", "edited a");
    dir.session(&[]);

    let session = dir.extractor().extract(&BTreeSet::new());

    let names: Vec<&str> = session.unsaved.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "new 1"]);
    for buffer in &session.unsaved {
        assert!(buffer.staged_path.starts_with(dir.home.path().join("staging")));
    }
    dir.home
        .child("staging/new 1@2024-05-01_101010")
        .assert(predicate::str::diff("scratch"));
}

#[test]
fn missing_backup_directory_means_no_unsaved_buffers() {
    let dir = EditorDir::new();
    let session = dir.extractor().extract(&BTreeSet::new());
    assert!(session.unsaved.is_empty());
    dir.home.child("staging").assert(predicate::path::missing());
}

#[test]
fn cleanup_removes_staged_files() {
    let dir = EditorDir::new();
    dir.file("editor/backup/x.txt@1", "x");
    dir.file("editor/backup/y.txt@2", "y");
    let extractor = dir.extractor();
    assert_eq!(extractor.stage_unsaved().expect("stage").len(), 2);

    assert_eq!(cleanup_staging(extractor.staging_dir()).expect("cleanup"), 2);
    assert_eq!(cleanup_staging(extractor.staging_dir()).expect("again"), 0);
    dir.home
        .child("editor/backup/x.txt@1")
        .assert(predicate::path::exists());
}

#[test]
fn cleanup_of_missing_directory_is_noop() {
    let dir = EditorDir::new();
    assert_eq!(cleanup_staging(&dir.home.path().join("nope")).expect("cleanup"), 0);
}
