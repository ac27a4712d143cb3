use catalog_tracker::filter::PathFilter;
use catalog_tracker::scanner::{FileStat, FileSystem, LocalFileSystem, WalkIter};
use catalog_tracker::scheduler::EngineState;
use catalog_tracker::storage::{self, ensure_catalog, SharedStore};
use catalog_tracker::tracker::{ChangeType, DuplicatePolicy, TaskSource, TrackerOptions};
use catalog_tracker::{CatalogStore, FileTracker, MemoryStore, TrackerTask, Visibility};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn temp_root() -> (TempDir, PathBuf) {
    let tmp = tempfile::Builder::new().prefix("tracker").tempdir().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    (tmp, root)
}

fn options() -> TrackerOptions {
    TrackerOptions {
        tick_delay: Duration::from_millis(5),
        watch: false,
        ..TrackerOptions::default()
    }
}

fn tracker_with(root: &Path, fs: Arc<dyn FileSystem>, options: TrackerOptions) -> (SharedStore, FileTracker) {
    let mut store = MemoryStore::new();
    let catalog = ensure_catalog(&mut store, "test", root.to_str().unwrap()).unwrap();
    let store = storage::shared(store);
    let tracker = FileTracker::new(catalog, store.clone(), fs, options);
    (store, tracker)
}

fn tracker(root: &Path) -> (SharedStore, FileTracker) {
    tracker_with(root, Arc::new(LocalFileSystem), options())
}

fn live_paths(store: &SharedStore, catalog_id: i64) -> Vec<String> {
    let mut paths: Vec<String> = storage::lock(store)
        .entries(catalog_id, Visibility::Live)
        .unwrap()
        .iter()
        .map(|e| e.path())
        .collect();
    paths.sort();
    paths
}

fn is_indexed(store: &SharedStore, catalog_id: i64) -> bool {
    storage::lock(store)
        .catalog(catalog_id)
        .unwrap()
        .unwrap()
        .is_indexed
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn test_created_tree_is_catalogued_then_indexed() {
    let (_tmp, root) = temp_root();
    fs::write(root.join("a"), "alpha").unwrap();
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("b").join("c"), "charlie").unwrap();

    let (store, tracker) = tracker(&root);
    let id = tracker.catalog().id;
    tracker.add(TrackerTask::created(root.join("a"), TaskSource::FileTracker));
    tracker.add(TrackerTask::created(root.join("b"), TaskSource::FileTracker));
    tracker.add(TrackerTask::created(root.join("b").join("c"), TaskSource::FileTracker));
    assert!(!is_indexed(&store, id));

    tracker.engine().drain(100);
    assert_eq!(live_paths(&store, id), vec!["/a", "/b/", "/b/c"]);
    assert!(is_indexed(&store, id));

    fs::remove_dir_all(root.join("b")).unwrap();
    tracker.add(TrackerTask::deleted(root.join("b"), TaskSource::FileTracker));
    tracker.engine().drain(100);
    assert_eq!(live_paths(&store, id), vec!["/a"]);
}

#[test]
fn test_created_directory_discovers_children() {
    let (_tmp, root) = temp_root();
    fs::create_dir_all(root.join("docs").join("drafts")).unwrap();
    fs::write(root.join("docs").join("readme.md"), "# hi").unwrap();
    fs::write(root.join("docs").join("drafts").join("v1.md"), "v1").unwrap();

    let (store, tracker) = tracker(&root);
    tracker.add(TrackerTask::created(root.join("docs"), TaskSource::FileTracker));
    tracker.engine().drain(100);

    assert_eq!(
        live_paths(&store, tracker.catalog().id),
        vec!["/docs/", "/docs/drafts/", "/docs/drafts/v1.md", "/docs/readme.md"]
    );
}

#[test]
fn test_changed_file_updates_signature() {
    let (_tmp, root) = temp_root();
    let file = root.join("notes.txt");
    fs::write(&file, "first").unwrap();

    let (store, tracker) = tracker(&root);
    let id = tracker.catalog().id;
    tracker.add(TrackerTask::created(&file, TaskSource::FileTracker));
    tracker.engine().drain(10);
    let before = storage::lock(&store).live_entry(id, "/", "notes.txt").unwrap().unwrap();

    fs::write(&file, "second, and longer").unwrap();
    tracker.add(TrackerTask::changed(&file, TaskSource::FileTracker));
    tracker.engine().drain(10);
    let after = storage::lock(&store).live_entry(id, "/", "notes.txt").unwrap().unwrap();

    assert_eq!(after.id, before.id);
    assert_ne!(after.signature, before.signature);
    assert_eq!(after.length, 18);
}

#[test]
fn test_rename_keeps_entry_identity() {
    let (_tmp, root) = temp_root();
    fs::create_dir(root.join("old")).unwrap();
    fs::write(root.join("old").join("inner.txt"), "inner").unwrap();

    let (store, tracker) = tracker(&root);
    let id = tracker.catalog().id;
    tracker.add(TrackerTask::created(root.join("old"), TaskSource::FileTracker));
    tracker.engine().drain(10);
    let before = storage::lock(&store).live_entry(id, "/old/", "inner.txt").unwrap().unwrap();

    fs::rename(root.join("old"), root.join("new")).unwrap();
    tracker.add(TrackerTask::renamed(root.join("old"), root.join("new"), TaskSource::FileTracker));
    tracker.engine().drain(10);

    assert_eq!(live_paths(&store, id), vec!["/new/", "/new/inner.txt"]);
    let after = storage::lock(&store).live_entry(id, "/new/", "inner.txt").unwrap().unwrap();
    assert_eq!(after.id, before.id);
}

#[test]
fn test_split_rename_events_move_the_entry() {
    for policy in [DuplicatePolicy::ReplaceLowerPriority, DuplicatePolicy::Reject] {
        let (_tmp, root) = temp_root();
        fs::create_dir(root.join("old")).unwrap();
        fs::write(root.join("old").join("inner.txt"), "inner").unwrap();
        let opts = TrackerOptions {
            duplicate_policy: policy,
            ..options()
        };
        let (store, tracker) = tracker_with(&root, Arc::new(LocalFileSystem), opts);
        let id = tracker.catalog().id;
        tracker.add(TrackerTask::created(root.join("old"), TaskSource::FileTracker));
        tracker.engine().drain(10);
        let dir_before = storage::lock(&store).live_entry(id, "/", "old").unwrap().unwrap();

        // One directory rename as inotify reports it: both halves, the pair,
        // then the moved directory's own watch
        fs::rename(root.join("old"), root.join("new")).unwrap();
        assert!(tracker.add(TrackerTask::deleted(root.join("old"), TaskSource::FileTracker)));
        assert!(tracker.add(TrackerTask::created(root.join("new"), TaskSource::FileTracker)));
        assert!(tracker.add(TrackerTask::renamed(root.join("old"), root.join("new"), TaskSource::FileTracker)));
        assert!(!tracker.add(TrackerTask::deleted(root.join("old"), TaskSource::FileTracker)));
        {
            let queue = tracker.engine().queue().lock().unwrap();
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.peek().unwrap().change_type, ChangeType::Renamed);
        }

        tracker.engine().drain(10);
        assert_eq!(live_paths(&store, id), vec!["/new/", "/new/inner.txt"]);
        let dir_after = storage::lock(&store).live_entry(id, "/", "new").unwrap().unwrap();
        assert_eq!(dir_after.id, dir_before.id, "{:?}", policy);
    }
}

#[test]
fn test_rename_halves_from_other_sources_are_kept() {
    let (_tmp, root) = temp_root();
    let (_store, tracker) = tracker(&root);
    fs::write(root.join("new.txt"), "n").unwrap();

    assert!(tracker.add(TrackerTask::created(root.join("new.txt"), TaskSource::ChangesScan)));
    assert!(tracker.add(TrackerTask::renamed(root.join("old.txt"), root.join("new.txt"), TaskSource::FileTracker)));
    assert_eq!(tracker.engine().len(), 1);
    assert!(tracker.add(TrackerTask::deleted(root.join("old.txt"), TaskSource::ExtrasScan)));
    assert_eq!(tracker.engine().len(), 2);
}

#[test]
fn test_rename_of_unknown_path_becomes_create() {
    let (_tmp, root) = temp_root();
    fs::create_dir(root.join("fresh")).unwrap();
    fs::write(root.join("fresh").join("x.txt"), "x").unwrap();

    let (store, tracker) = tracker(&root);
    tracker.add(TrackerTask::renamed(root.join("never-seen"), root.join("fresh"), TaskSource::FileTracker));
    tracker.engine().drain(10);

    assert_eq!(live_paths(&store, tracker.catalog().id), vec!["/fresh/", "/fresh/x.txt"]);
}

#[test]
fn test_rename_across_filter_boundary() {
    let (_tmp, root) = temp_root();
    let opts = TrackerOptions {
        filter: Arc::new(PathFilter::new().ignore(["**/*.tmp"])),
        ..options()
    };
    let (store, tracker) = tracker_with(&root, Arc::new(LocalFileSystem), opts);
    let id = tracker.catalog().id;

    // Untracked to tracked: the rename becomes a create of the new path
    fs::write(root.join("final.txt"), "done").unwrap();
    assert!(tracker.add(TrackerTask::renamed(
        root.join("draft.tmp"),
        root.join("final.txt"),
        TaskSource::FileTracker
    )));
    {
        let queue = tracker.engine().queue().lock().unwrap();
        let queued = queue.peek().unwrap();
        assert_eq!(queued.change_type, ChangeType::Created);
        assert!(queued.old_full_path.is_none());
    }
    tracker.engine().drain(10);
    assert_eq!(live_paths(&store, id), vec!["/final.txt"]);

    // Tracked to untracked: the rename becomes a delete of the old path
    fs::rename(root.join("final.txt"), root.join("final.tmp")).unwrap();
    tracker.add(TrackerTask::renamed(
        root.join("final.txt"),
        root.join("final.tmp"),
        TaskSource::FileTracker,
    ));
    {
        let queue = tracker.engine().queue().lock().unwrap();
        assert_eq!(queue.peek().unwrap().change_type, ChangeType::Deleted);
    }
    tracker.engine().drain(10);
    assert!(live_paths(&store, id).is_empty());

    // Both sides untracked: dropped
    assert!(!tracker.add(TrackerTask::renamed(
        root.join("a.tmp"),
        root.join("b.tmp"),
        TaskSource::FileTracker
    )));
}

#[test]
fn test_root_and_foreign_paths_are_vetoed() {
    let (_tmp, root) = temp_root();
    let (_store, tracker) = tracker(&root);
    assert!(!tracker.add(TrackerTask::changed(&root, TaskSource::FileTracker)));
    assert!(!tracker.add(TrackerTask::created("/definitely/not/under/root", TaskSource::FileTracker)));
    assert!(tracker.engine().is_empty());
}

#[test]
fn test_duplicate_replaced_only_by_higher_priority() {
    let (_tmp, root) = temp_root();
    let path = root.join("dup.txt");
    fs::write(&path, "x").unwrap();
    let (_store, tracker) = tracker(&root);

    assert!(tracker.add(TrackerTask::changed(&path, TaskSource::ChangesScan)));
    // Equal priority does not replace
    assert!(!tracker.add(TrackerTask::changed(&path, TaskSource::ChangesScan)));
    // Higher priority replaces, case-insensitively
    let shouted = root.join("DUP.TXT");
    assert!(tracker.add(TrackerTask::deleted(&shouted, TaskSource::FileTracker)));
    // Lower priority is rejected
    assert!(!tracker.add(TrackerTask::created(&path, TaskSource::ExtrasScan)));

    let queue = tracker.engine().queue().lock().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.peek().unwrap().change_type, ChangeType::Deleted);
}

#[test]
fn test_reject_policy_keeps_first() {
    let (_tmp, root) = temp_root();
    let path = root.join("dup.txt");
    fs::write(&path, "x").unwrap();
    let opts = TrackerOptions {
        duplicate_policy: DuplicatePolicy::Reject,
        ..options()
    };
    let (_store, tracker) = tracker_with(&root, Arc::new(LocalFileSystem), opts);

    assert!(tracker.add(TrackerTask::changed(&path, TaskSource::ChangesScan)));
    assert!(!tracker.add(TrackerTask::deleted(&path, TaskSource::FileTracker)));
    let queue = tracker.engine().queue().lock().unwrap();
    assert_eq!(queue.peek().unwrap().change_type, ChangeType::Changed);
}

/// Local disk, except that anything named `locked*` cannot be read.
struct LockedFiles(LocalFileSystem);

fn locked(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with("locked"))
        .unwrap_or(false)
}

impl FileSystem for LockedFiles {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        if locked(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
        }
        self.0.stat(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.0.read_dir(path)
    }

    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
        self.0.walk(root)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.0.open(path)
    }
}

#[test]
fn test_failing_task_is_retried_then_dropped() {
    let (_tmp, root) = temp_root();
    fs::write(root.join("locked.txt"), "secret").unwrap();
    fs::write(root.join("open.txt"), "public").unwrap();
    let (store, tracker) = tracker_with(&root, Arc::new(LockedFiles(LocalFileSystem)), options());

    tracker.add(TrackerTask::changed(root.join("locked.txt"), TaskSource::FileTracker));
    tracker.add(TrackerTask::changed(root.join("open.txt"), TaskSource::ChangesScan));
    tracker.engine().drain(100);

    let stats = tracker.stats();
    // The first attempt plus three retries
    assert_eq!(stats.errors, 4);
    assert_eq!(stats.executed, 1);
    assert!(tracker.engine().is_empty());
    assert_eq!(live_paths(&store, tracker.catalog().id), vec!["/open.txt"]);
}

#[test]
fn test_unreadable_entry_is_not_an_extra() {
    let (_tmp, root) = temp_root();
    fs::write(root.join("locked.txt"), "secret").unwrap();
    fs::write(root.join("open.txt"), "public").unwrap();
    let (store, indexer) = tracker(&root);
    let id = indexer.catalog().id;
    indexer.add(TrackerTask::created(root.join("locked.txt"), TaskSource::FileTracker));
    indexer.add(TrackerTask::created(root.join("open.txt"), TaskSource::FileTracker));
    indexer.engine().drain(10);
    assert_eq!(live_paths(&store, id), vec!["/locked.txt", "/open.txt"]);

    let catalog = storage::lock(&store).catalog(id).unwrap().unwrap();
    let tracker = FileTracker::new(catalog, store.clone(), Arc::new(LockedFiles(LocalFileSystem)), options());
    assert_eq!(tracker.queue_extras().unwrap(), 0);

    fs::remove_file(root.join("open.txt")).unwrap();
    assert_eq!(tracker.queue_extras().unwrap(), 1);
    tracker.engine().drain(10);
    assert_eq!(live_paths(&store, id), vec!["/locked.txt"]);

    // Still on disk, just unreadable: retried, never deleted
    tracker.add(TrackerTask::deleted(root.join("locked.txt"), TaskSource::FileTracker));
    tracker.engine().drain(10);
    assert_eq!(tracker.stats().errors, 4);
    assert_eq!(live_paths(&store, id), vec!["/locked.txt"]);
}

#[test]
fn test_start_rejects_missing_root() {
    let (_tmp, root) = temp_root();
    let (_store, tracker) = tracker(&root.join("absent"));
    assert!(tracker.start().unwrap_err().is_invalid_argument());
}

#[test]
fn test_start_indexes_then_catches_up() {
    let (_tmp, root) = temp_root();
    fs::write(root.join("a.txt"), "alpha").unwrap();
    fs::write(root.join("b.txt"), "bravo").unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub").join("c.txt"), "charlie").unwrap();

    let (store, first) = tracker(&root);
    let id = first.catalog().id;
    let report = first.start().unwrap();
    assert_eq!(report.extras, 0);
    assert_eq!(report.changes, 3);
    assert!(wait_until(Duration::from_secs(10), || is_indexed(&store, id)));
    first.stop();
    assert_eq!(live_paths(&store, id), vec!["/a.txt", "/b.txt", "/sub/", "/sub/c.txt"]);

    // Offline edits
    fs::remove_file(root.join("b.txt")).unwrap();
    fs::remove_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("new.txt"), "november").unwrap();

    let catalog = storage::lock(&store).catalog(id).unwrap().unwrap();
    let second = FileTracker::new(catalog, store.clone(), Arc::new(LocalFileSystem), options());
    let report = second.start().unwrap();
    // b.txt and sub/ are missing; sub/c.txt is covered by its directory
    assert_eq!(report.extras, 2);
    assert_eq!(report.changes, 1);
    assert!(wait_until(Duration::from_secs(10), || {
        live_paths(&store, id) == vec!["/a.txt", "/new.txt"]
    }));
    second.stop();
}

#[test]
fn test_watcher_feeds_engine() {
    let (_tmp, root) = temp_root();
    let opts = TrackerOptions {
        watch: true,
        ..options()
    };
    let (store, tracker) = tracker_with(&root, Arc::new(LocalFileSystem), opts);
    let id = tracker.catalog().id;
    let report = tracker.start().unwrap();
    assert_eq!(report.changes, 0);

    fs::write(root.join("watched.txt"), "seen").unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        live_paths(&store, id) == vec!["/watched.txt"]
    }));

    fs::remove_file(root.join("watched.txt")).unwrap();
    assert!(wait_until(Duration::from_secs(10), || live_paths(&store, id).is_empty()));

    tracker.stop();
    assert_eq!(tracker.watch_errors(), 0);
}

#[test]
fn test_watcher_rename_moves_entry() {
    let (_tmp, root) = temp_root();
    fs::create_dir(root.join("old")).unwrap();
    fs::write(root.join("old").join("inner.txt"), "inner").unwrap();
    let opts = TrackerOptions {
        watch: true,
        tick_delay: Duration::from_millis(100),
        ..options()
    };
    let (store, tracker) = tracker_with(&root, Arc::new(LocalFileSystem), opts);
    let id = tracker.catalog().id;
    tracker.start().unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        live_paths(&store, id) == vec!["/old/", "/old/inner.txt"]
            && tracker.engine().state() == EngineState::Ready
    }));
    let dir_before = storage::lock(&store).live_entry(id, "/", "old").unwrap().unwrap();

    fs::rename(root.join("old"), root.join("new")).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        live_paths(&store, id) == vec!["/new/", "/new/inner.txt"]
            && tracker.engine().state() == EngineState::Ready
    }));

    // inotify pairs the two halves of a rename
    if cfg!(target_os = "linux") {
        let dir_after = storage::lock(&store).live_entry(id, "/", "new").unwrap().unwrap();
        assert_eq!(dir_after.id, dir_before.id);
    }
    tracker.stop();
    assert_eq!(tracker.watch_errors(), 0);
}
