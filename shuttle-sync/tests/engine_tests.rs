//! Blob sync engine: conflict policy, idempotence, batches, peer notification.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use rstest::rstest;
use tempfile::TempDir;

use shuttle_core::{registry::lock, SharedRegistry, SyncDirection, TrackedFileRegistry};
use shuttle_sync::{
    BlobRecord, BlobStore, ChangeNotifier, FsBlobStore, MemoryBlobStore, PassSummary, SyncEngine, SyncError,
    SyncOutcome,
};

struct Fixture {
    home: TempDir,
    store: Arc<MemoryBlobStore>,
    registry: SharedRegistry,
    engine: SyncEngine,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryBlobStore::new());
    let registry = TrackedFileRegistry::open_at(home.path())
        .expect("registry")
        .into_shared();
    let engine = SyncEngine::new(store.clone(), registry.clone(), home.path().join("sync"))
        .with_extensions(vec!["txt".to_string()]);
    Fixture {
        home,
        store,
        registry,
        engine,
    }
}

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).expect("timestamp")
}

fn write_with_mtime(path: &Path, content: &str, mtime: DateTime<Utc>) {
    std::fs::write(path, content).expect("write");
    let stamp = FileTime::from_unix_time(mtime.timestamp(), mtime.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, stamp).expect("set mtime");
}

#[derive(Default)]
struct RecordingNotifier {
    keys: Mutex<Vec<String>>,
}

impl ChangeNotifier for RecordingNotifier {
    fn notify_changed(&self, key: &str) -> Result<(), SyncError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

struct FailingNotifier {
    calls: AtomicUsize,
}

impl ChangeNotifier for FailingNotifier {
    fn notify_changed(&self, _key: &str) -> Result<(), SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::Notify("connection refused".to_string()))
    }
}

/// Memory store that lets the user save `path` once while a `put` is in flight.
struct EditDuringPut {
    inner: MemoryBlobStore,
    path: PathBuf,
    edited: AtomicBool,
}

impl BlobStore for EditDuringPut {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<BlobRecord, SyncError> {
        if !self.edited.swap(true, Ordering::SeqCst) {
            write_with_mtime(&self.path, "typed during upload", at(4_000));
        }
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        self.inner.get(key)
    }

    fn head(&self, key: &str) -> Result<Option<BlobRecord>, SyncError> {
        self.inner.head(key)
    }

    fn list(&self) -> Result<Vec<String>, SyncError> {
        self.inner.list()
    }
}

// ---------------------------------------------------------------------------
// 1. Conflict policy
// ---------------------------------------------------------------------------

#[rstest]
#[case::local_newer(2_000, 1_000, SyncOutcome::Uploaded)]
#[case::blob_newer(1_000, 2_000, SyncOutcome::Downloaded)]
#[case::equal_to_the_millisecond(1_700_000_000_123, 1_700_000_000_123, SyncOutcome::Skipped)]
fn auto_direction_follows_timestamps(
    #[case] local_ms: i64,
    #[case] blob_ms: i64,
    #[case] expected: SyncOutcome,
) {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    write_with_mtime(&path, "local", at(local_ms));
    fx.store.insert_at("a.txt", b"remote", at(blob_ms));
    fx.store.set_clock(Some(at(local_ms.max(blob_ms) + 10)));

    let outcome = fx.engine.sync_one(&path, SyncDirection::Auto).expect("sync");
    assert_eq!(outcome, expected);

    let on_disk = std::fs::read_to_string(&path).expect("read");
    let in_store = fx.store.content("a.txt").expect("blob");
    match expected {
        SyncOutcome::Uploaded => assert_eq!(in_store, b"local"),
        SyncOutcome::Downloaded => assert_eq!(on_disk, "remote"),
        SyncOutcome::Skipped => {
            assert_eq!(on_disk, "local");
            assert_eq!(in_store, b"remote");
        }
    }
}

#[test]
fn missing_blob_is_uploaded() {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    std::fs::write(&path, "alpha").expect("write");

    let outcome = fx.engine.sync_one(&path, SyncDirection::Auto).expect("sync");
    assert_eq!(outcome, SyncOutcome::Uploaded);
    assert_eq!(fx.store.content("a.txt").as_deref(), Some(&b"alpha"[..]));
}

// ---------------------------------------------------------------------------
// 2. Idempotence
// ---------------------------------------------------------------------------

#[test]
fn second_auto_pass_is_skipped_after_upload() {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    std::fs::write(&path, "alpha").expect("write");

    assert_eq!(
        fx.engine.sync_one(&path, SyncDirection::Auto).expect("first"),
        SyncOutcome::Uploaded
    );
    assert_eq!(
        fx.engine.sync_one(&path, SyncDirection::Auto).expect("second"),
        SyncOutcome::Skipped
    );
    assert_eq!(fx.store.put_count(), 1);
}

#[test]
fn second_auto_pass_is_skipped_after_download() {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    write_with_mtime(&path, "old", at(1_000));
    fx.store.insert_at("a.txt", b"new", at(5_000));

    assert_eq!(
        fx.engine.sync_one(&path, SyncDirection::Auto).expect("first"),
        SyncOutcome::Downloaded
    );
    assert_eq!(
        fx.engine.sync_one(&path, SyncDirection::Auto).expect("second"),
        SyncOutcome::Skipped
    );
    assert_eq!(fx.store.get_count(), 1);
}

#[test]
fn two_hosts_sharing_a_directory_store_converge() {
    let store_dir = TempDir::new().expect("store");
    let host_a = TempDir::new().expect("host a");
    let host_b = TempDir::new().expect("host b");

    let engine_for = |home: &TempDir| {
        let registry = TrackedFileRegistry::open_at(home.path())
            .expect("registry")
            .into_shared();
        SyncEngine::new(
            Arc::new(FsBlobStore::new(store_dir.path())),
            registry,
            home.path().join("sync"),
        )
    };
    let a = engine_for(&host_a);
    let b = engine_for(&host_b);

    let file = host_a.path().join("notes.txt");
    std::fs::write(&file, "draft").expect("write");
    lock(a.registry()).add(&file).expect("track");

    let first = PassSummary::from_reports(&a.reconcile().expect("a pass"));
    assert_eq!(first.uploaded, 1);

    let pulled = PassSummary::from_reports(&b.reconcile().expect("b pass"));
    assert_eq!(pulled.downloaded, 1);
    let mirrored = host_b.path().join("sync").join("notes.txt");
    assert_eq!(std::fs::read_to_string(&mirrored).expect("read"), "draft");
    assert!(lock(b.registry()).contains(&mirrored), "download auto-tracks");

    assert_eq!(PassSummary::from_reports(&a.reconcile().unwrap()).skipped, 1);
    assert_eq!(PassSummary::from_reports(&b.reconcile().unwrap()).skipped, 1);
}

// ---------------------------------------------------------------------------
// 3. Forced directions and missing sides
// ---------------------------------------------------------------------------

#[test]
fn force_upload_ignores_newer_blob() {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    write_with_mtime(&path, "mine", at(1_000));
    fx.store.insert_at("a.txt", b"theirs", at(9_000));

    let outcome = fx.engine.sync_one(&path, SyncDirection::ForceUpload).expect("sync");
    assert_eq!(outcome, SyncOutcome::Uploaded);
    assert_eq!(fx.store.content("a.txt").as_deref(), Some(&b"mine"[..]));
}

#[test]
fn force_download_without_blob_is_not_found() {
    let fx = fixture();
    let path = fx.home.path().join("a.txt");
    std::fs::write(&path, "mine").expect("write");

    let err = fx
        .engine
        .sync_one(&path, SyncDirection::ForceDownload)
        .unwrap_err();
    assert!(matches!(err, SyncError::BlobNotFound { .. }), "got: {err}");
}

#[test]
fn force_upload_of_missing_file_is_local_missing() {
    let fx = fixture();
    let err = fx
        .engine
        .sync_one(&fx.home.path().join("gone.txt"), SyncDirection::ForceUpload)
        .unwrap_err();
    assert!(matches!(err, SyncError::LocalMissing { .. }), "got: {err}");
}

#[test]
fn auto_with_neither_side_is_missing() {
    let fx = fixture();
    let err = fx
        .engine
        .sync_one(&fx.home.path().join("gone.txt"), SyncDirection::Auto)
        .unwrap_err();
    assert!(matches!(err, SyncError::Missing { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 4. Batches
// ---------------------------------------------------------------------------

#[test]
fn batch_failures_do_not_abort_other_files() {
    let fx = fixture();
    let good_a = fx.home.path().join("a.txt");
    let good_b = fx.home.path().join("b.txt");
    std::fs::write(&good_a, "a").expect("write");
    std::fs::write(&good_b, "b").expect("write");
    let missing = fx.home.path().join("missing.txt");

    let reports = fx.engine.sync_all(
        vec![good_a.clone(), missing.clone(), good_b.clone()],
        SyncDirection::ForceUpload,
    );

    assert_eq!(reports.len(), 3);
    assert!(matches!(reports[0].outcome, Ok(SyncOutcome::Uploaded)));
    assert!(reports[1].outcome.is_err());
    assert_eq!(reports[1].path, missing);
    assert!(matches!(reports[2].outcome, Ok(SyncOutcome::Uploaded)));

    let summary = PassSummary::from_reports(&reports);
    assert_eq!((summary.uploaded, summary.failed), (2, 1));
}

#[test]
fn reconcile_materializes_remote_only_blobs_and_honours_allow_list() {
    let fx = fixture();
    fx.store.insert_at("remote.txt", b"from worker", at(1_000));
    fx.store.insert_at("picture.png", b"\x89PNG", at(1_000));

    let reports = fx.engine.reconcile().expect("reconcile");
    let paths: Vec<PathBuf> = reports.iter().map(|r| r.path.clone()).collect();
    let expected = fx.home.path().join("sync").join("remote.txt");

    assert_eq!(paths, vec![expected.clone()]);
    assert_eq!(std::fs::read_to_string(&expected).expect("read"), "from worker");
    assert!(lock(&fx.registry).contains(&expected));
}

#[test]
fn pull_prefers_tracked_path_with_same_name() {
    let fx = fixture();
    let tracked = fx.home.path().join("work").join("a.txt");
    std::fs::create_dir_all(tracked.parent().unwrap()).expect("mkdir");
    write_with_mtime(&tracked, "old", at(1_000));
    lock(&fx.registry).add(&tracked).expect("track");
    fx.store.insert_at("a.txt", b"new", at(2_000));

    let report = fx.engine.pull("a.txt");
    assert_eq!(report.path, tracked);
    assert!(matches!(report.outcome, Ok(SyncOutcome::Downloaded)));
    assert_eq!(std::fs::read_to_string(&tracked).expect("read"), "new");
}

// ---------------------------------------------------------------------------
// 5. Peer notification and settled files
// ---------------------------------------------------------------------------

#[test]
fn upload_notifies_peer_with_key() {
    let fx = fixture();
    let notifier = Arc::new(RecordingNotifier::default());
    fx.engine.set_peer(Some(notifier.clone()));
    let path = fx.home.path().join("a.txt");
    std::fs::write(&path, "a").expect("write");

    fx.engine.sync_one(&path, SyncDirection::ForceUpload).expect("sync");
    assert_eq!(*notifier.keys.lock().unwrap(), vec!["a.txt".to_string()]);
}

#[test]
fn notification_failure_does_not_fail_upload() {
    let fx = fixture();
    let notifier = Arc::new(FailingNotifier {
        calls: AtomicUsize::new(0),
    });
    fx.engine.set_peer(Some(notifier.clone()));
    let path = fx.home.path().join("a.txt");
    std::fs::write(&path, "a").expect("write");

    let outcome = fx.engine.sync_one(&path, SyncDirection::ForceUpload);
    assert!(matches!(outcome, Ok(SyncOutcome::Uploaded)));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert!(fx.store.head("a.txt").expect("head").is_some());
}

#[test]
fn downloaded_file_is_settled_until_edited() {
    let fx = fixture();
    fx.store.insert_at("a.txt", b"remote", at(1_000));
    let report = fx.engine.pull("a.txt");
    assert!(report.outcome.is_ok());
    assert!(fx.engine.is_settled(&report.path));

    write_with_mtime(&report.path, "edited", at(2_000));
    assert!(!fx.engine.is_settled(&report.path));
}

#[test]
fn pull_rejects_keys_that_leave_the_sync_dir() {
    let fx = fixture();
    fx.store.insert_at("a.txt", b"payload", at(1_000));

    let report = fx.engine.pull("../outside/a.txt");
    assert!(matches!(report.outcome, Err(SyncError::InvalidKey { .. })));
    assert!(!fx.home.path().join("outside").join("a.txt").exists());
    assert!(lock(&fx.registry).is_empty());
}

// ---------------------------------------------------------------------------
// 6. Edits racing an upload
// ---------------------------------------------------------------------------

#[test]
fn edit_during_upload_is_not_overwritten_by_the_next_pass() {
    let home = TempDir::new().expect("home");
    let path = home.path().join("notes.txt");
    write_with_mtime(&path, "old", at(1_000));
    let store = Arc::new(EditDuringPut {
        inner: MemoryBlobStore::new(),
        path: path.clone(),
        edited: AtomicBool::new(false),
    });
    store.inner.set_clock(Some(at(5_000)));
    let registry = TrackedFileRegistry::open_at(home.path())
        .expect("registry")
        .into_shared();
    lock(&registry).add(&path).expect("track");
    let engine = SyncEngine::new(store.clone(), registry.clone(), home.path().join("sync"));

    let first = engine.sync_one(&path, SyncDirection::ForceUpload).expect("upload");
    assert_eq!(first, SyncOutcome::Uploaded);
    assert_eq!(store.inner.content("notes.txt").as_deref(), Some(&b"old"[..]));
    assert!(!engine.is_settled(&path), "edited file must stay pending");

    let second = engine.sync_one(&path, SyncDirection::Auto).expect("auto");
    assert_eq!(second, SyncOutcome::Uploaded);
    assert_eq!(std::fs::read_to_string(&path).expect("read"), "typed during upload");
    assert_eq!(
        store.inner.content("notes.txt").as_deref(),
        Some(&b"typed during upload"[..])
    );
}

#[test]
fn edit_during_upload_with_a_later_mtime_keeps_it() {
    let home = TempDir::new().expect("home");
    let path = home.path().join("notes.txt");
    write_with_mtime(&path, "old", at(1_000));
    let store = Arc::new(EditDuringPut {
        inner: MemoryBlobStore::new(),
        path: path.clone(),
        edited: AtomicBool::new(false),
    });
    store.inner.set_clock(Some(at(3_000)));
    let registry = TrackedFileRegistry::open_at(home.path())
        .expect("registry")
        .into_shared();
    let engine = SyncEngine::new(store.clone(), registry, home.path().join("sync"));

    engine.sync_one(&path, SyncDirection::ForceUpload).expect("upload");
    let mtime = std::fs::metadata(&path).expect("meta").modified().expect("mtime");
    assert_eq!(DateTime::<Utc>::from(mtime), at(4_000));
    assert_eq!(engine.sync_one(&path, SyncDirection::Auto).expect("auto"), SyncOutcome::Uploaded);
}
