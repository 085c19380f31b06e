//! Debounced change watcher.
//!
//! Turns filesystem events into `ForceUpload` syncs of tracked files. The
//! watcher owns its debounce map and the set of watched directories; the
//! engine does the transfer on the blocking pool, so the event loop never
//! waits on the store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use shuttle_core::paths::is_tmp_artifact;
use shuttle_core::registry::lock;
use shuttle_core::{has_allowed_extension, ShuttleConfig, SyncDirection};
use shuttle_sync::SyncEngine;

use crate::error::{io_err, DaemonError};
use crate::paths::REWATCH_INTERVAL;

/// Entries older than this are dropped from the debounce map.
const DEBOUNCE_RETENTION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub debounce: Duration,
    pub rewatch_interval: Duration,
    /// Watched recursively when set.
    pub editor_dir: Option<PathBuf>,
    /// Track and upload allow-listed files that appear in the sync directory.
    pub auto_track: bool,
}

impl WatcherSettings {
    pub fn from_config(config: &ShuttleConfig) -> Self {
        Self {
            debounce: config.debounce_window(),
            rewatch_interval: REWATCH_INTERVAL,
            editor_dir: config.editor.data_dir.clone(),
            auto_track: false,
        }
    }

    pub fn with_auto_track(mut self, auto_track: bool) -> Self {
        self.auto_track = auto_track;
        self
    }
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

/// Per-path debounce measured from the last trigger: events inside the
/// window after a trigger are dropped and do not extend it.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn should_fire(&mut self, path: &Path, now: Instant) -> bool {
        let horizon = DEBOUNCE_RETENTION.max(self.window);
        self.last
            .retain(|_, fired_at| now.duration_since(*fired_at) <= horizon);
        match self.last.get(path) {
            Some(fired_at) if now.duration_since(*fired_at) < self.window => false,
            _ => {
                self.last.insert(path.to_path_buf(), now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

pub struct ChangeWatcher {
    engine: Arc<SyncEngine>,
    settings: WatcherSettings,
    debouncer: Debouncer,
    watched: HashSet<PathBuf>,
    sync_dir: PathBuf,
}

impl ChangeWatcher {
    pub fn new(engine: Arc<SyncEngine>, settings: WatcherSettings) -> Self {
        // Canonical so FSEvents real paths (/private/var/...) match starts_with.
        let sync_dir = fs::canonicalize(engine.sync_dir())
            .unwrap_or_else(|_| engine.sync_dir().to_path_buf());
        Self {
            debouncer: Debouncer::new(settings.debounce),
            engine,
            settings,
            watched: HashSet::new(),
            sync_dir,
        }
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    /// Watch until shutdown. Returns an error only if the OS watcher cannot
    /// be created.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        if self.settings.auto_track {
            let dir = self.engine.sync_dir().to_path_buf();
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            self.sync_dir = fs::canonicalize(&dir).unwrap_or(dir);
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        self.refresh_watches(&mut watcher);

        let mut rewatch = tokio::time::interval(self.settings.rewatch_interval);
        rewatch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        rewatch.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = rewatch.tick() => self.refresh_watches(&mut watcher),
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let event = match event {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::warn!(error = %err, "watcher event error");
                            continue;
                        }
                    };
                    for path in self.triggered_paths(&event, Instant::now()) {
                        self.dispatch(path);
                    }
                }
            }
        }

        tracing::info!(watched = self.watched.len(), "change watcher stopped");
        Ok(())
    }

    /// Tracked paths that `event` should upload now.
    pub fn triggered_paths(&mut self, event: &Event, now: Instant) -> Vec<PathBuf> {
        if !is_relevant_event_kind(&event.kind) {
            return Vec::new();
        }
        let mut triggered = Vec::new();
        for path in &event.paths {
            let Some(target) = self.resolve(path) else {
                continue;
            };
            if self.engine.is_settled(&target) {
                tracing::trace!(path = %target.display(), "unchanged since last sync");
                continue;
            }
            if !self.debouncer.should_fire(&target, now) {
                tracing::trace!(path = %target.display(), "debounced");
                continue;
            }
            if !triggered.contains(&target) {
                triggered.push(target);
            }
        }
        triggered
    }

    fn resolve(&self, path: &Path) -> Option<PathBuf> {
        if is_tmp_artifact(path) {
            return None;
        }
        if let Some(tracked) = lock(self.engine.registry()).resolve(path) {
            return Some(tracked);
        }
        let adoptable = self.settings.auto_track
            && path.starts_with(&self.sync_dir)
            && has_allowed_extension(path, self.engine.extensions())
            && path.is_file();
        adoptable.then(|| path.to_path_buf())
    }

    fn dispatch(&self, path: PathBuf) {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            // A download may have finished between the event and now.
            if engine.is_settled(&path) {
                return;
            }
            match engine.sync_one(&path, SyncDirection::ForceUpload) {
                Ok(outcome) => {
                    tracing::info!(path = %path.display(), ?outcome, "watcher-triggered sync")
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "watcher-triggered sync failed")
                }
            }
        });
    }

    /// Directories the watcher should cover right now, with their mode.
    pub fn watch_targets(&self) -> BTreeMap<PathBuf, RecursiveMode> {
        let mut targets = BTreeMap::new();
        for tracked in lock(self.engine.registry()).snapshot() {
            if let Some(parent) = tracked.parent() {
                targets.insert(parent.to_path_buf(), RecursiveMode::NonRecursive);
            }
        }
        if self.settings.auto_track {
            targets.insert(self.sync_dir.clone(), RecursiveMode::NonRecursive);
        }
        if let Some(editor_dir) = &self.settings.editor_dir {
            targets.insert(editor_dir.clone(), RecursiveMode::Recursive);
        }
        targets
    }

    fn refresh_watches(&mut self, watcher: &mut RecommendedWatcher) {
        for (dir, mode) in self.watch_targets() {
            if self.watched.contains(&dir) || !dir.is_dir() {
                continue;
            }
            match watcher.watch(&dir, mode) {
                Ok(()) => {
                    tracing::debug!(path = %dir.display(), ?mode, "watching directory");
                    self.watched.insert(dir);
                }
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "cannot watch directory")
                }
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
    use shuttle_core::TrackedFileRegistry;
    use shuttle_sync::MemoryBlobStore;
    use tempfile::TempDir;
    use tokio::time::advance;

    fn modify(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path.into())
    }

    struct Setup {
        home: TempDir,
        engine: Arc<SyncEngine>,
    }

    impl Setup {
        fn new() -> Self {
            let home = TempDir::new().expect("home");
            let registry = TrackedFileRegistry::open_at(home.path())
                .expect("registry")
                .into_shared();
            let engine = SyncEngine::new(
                Arc::new(MemoryBlobStore::new()),
                registry,
                home.path().join("sync"),
            )
            .with_extensions(vec!["txt".into()]);
            Self {
                home,
                engine: Arc::new(engine),
            }
        }

        fn tracked(&self, name: &str) -> PathBuf {
            let path = self.home.path().join("work").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "body").unwrap();
            lock(self.engine.registry()).add(&path).unwrap();
            path
        }

        fn watcher(&self, auto_track: bool) -> ChangeWatcher {
            let settings = WatcherSettings {
                debounce: Duration::from_secs(2),
                rewatch_interval: REWATCH_INTERVAL,
                editor_dir: Some(self.home.path().join("editor")),
                auto_track,
            };
            ChangeWatcher::new(self.engine.clone(), settings)
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn five_saves_in_one_and_a_half_seconds_trigger_once() {
        let mut debounce = Debouncer::new(Duration::from_secs(2));
        let path = PathBuf::from("/work/notes.txt");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if debounce.should_fire(&path, Instant::now()) {
                triggers += 1;
            }
            advance(Duration::from_millis(375)).await;
        }
        assert_eq!(triggers, 1, "rapid saves collapse to one upload trigger");

        advance(Duration::from_millis(600)).await;
        assert!(debounce.should_fire(&path, Instant::now()), "window elapsed");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn window_is_measured_from_the_last_trigger() {
        let mut debounce = Debouncer::new(Duration::from_secs(2));
        let path = PathBuf::from("/work/notes.txt");

        assert!(debounce.should_fire(&path, Instant::now()));
        advance(Duration::from_millis(1_900)).await;
        assert!(!debounce.should_fire(&path, Instant::now()));
        advance(Duration::from_millis(200)).await;
        assert!(debounce.should_fire(&path, Instant::now()));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn stale_entries_are_pruned() {
        let mut debounce = Debouncer::new(Duration::from_millis(100));
        debounce.should_fire(Path::new("/a.txt"), Instant::now());
        advance(Duration::from_secs(31)).await;
        debounce.should_fire(Path::new("/b.txt"), Instant::now());
        assert_eq!(debounce.len(), 1);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn events_resolve_to_tracked_files() {
        let setup = Setup::new();
        let notes = setup.tracked("notes.txt");
        let mut watcher = setup.watcher(false);

        // Editor saved through a sibling and renamed it over the original.
        let elsewhere = setup.home.path().join("editor/notes.txt");
        assert_eq!(watcher.triggered_paths(&modify(&elsewhere), Instant::now()), vec![notes]);

        let untracked = setup.home.path().join("work/other.txt");
        assert!(watcher
            .triggered_paths(&modify(&untracked), Instant::now())
            .is_empty());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn temp_files_and_removals_are_ignored() {
        let setup = Setup::new();
        let notes = setup.tracked("notes.txt");
        let mut watcher = setup.watcher(false);

        let tmp = shuttle_core::paths::tmp_sibling(&notes);
        assert!(watcher.triggered_paths(&modify(&tmp), Instant::now()).is_empty());

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(notes.clone());
        assert!(watcher.triggered_paths(&removed, Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn settled_files_do_not_bounce_back() {
        let setup = Setup::new();
        let notes = setup.tracked("notes.txt");
        setup
            .engine
            .sync_one(&notes, SyncDirection::ForceUpload)
            .unwrap();
        let mut watcher = setup.watcher(false);

        assert!(watcher.triggered_paths(&modify(&notes), Instant::now()).is_empty());
        assert!(watcher.debouncer.is_empty(), "settled events spend no window");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn auto_track_adopts_allow_listed_files_in_sync_dir() {
        let setup = Setup::new();
        let sync_dir = setup.home.path().join("sync");
        fs::create_dir_all(&sync_dir).unwrap();
        let report = sync_dir.join("report.txt");
        let image = sync_dir.join("image.png");
        fs::write(&report, "r").unwrap();
        fs::write(&image, "i").unwrap();

        let mut passive = setup.watcher(false);
        assert!(passive.triggered_paths(&modify(&report), Instant::now()).is_empty());

        let mut adopting = setup.watcher(true);
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(report.clone())
            .add_path(image);
        assert_eq!(adopting.triggered_paths(&created, Instant::now()), vec![report]);
    }

    #[test]
    fn watch_targets_cover_parents_editor_dir_and_sync_dir() {
        let setup = Setup::new();
        let notes = setup.tracked("notes.txt");
        let watcher = setup.watcher(true);

        let targets = watcher.watch_targets();
        assert_eq!(
            targets.get(notes.parent().unwrap()),
            Some(&RecursiveMode::NonRecursive)
        );
        assert_eq!(
            targets.get(&setup.home.path().join("editor")),
            Some(&RecursiveMode::Recursive)
        );
        assert!(targets.contains_key(&watcher.sync_dir));
    }
}
