use super::events::map_event;
use super::task::{TaskSource, TrackerTask};
use super::work_queue::{DuplicatePolicy, TrackerWorkQueue};
use crate::delta::{ContentTransfer, DeltaEngine, LoggingTransfer};
use crate::error::{Error, Result};
use crate::filter::{SharedFilter, TrackAll};
use crate::hasher::ContentHasher;
use crate::model::{normalize_date, Catalog, CatalogEntry};
use crate::queue::PriorityQueue;
use crate::scanner::FileSystem;
use crate::scheduler::{EngineStats, TaskEngine, TaskHooks, DEFAULT_TICK_DELAY};
use crate::storage::{self, SharedStore, Visibility};
use crate::utils::lock;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborators and knobs for a [`FileTracker`].
#[derive(Clone)]
pub struct TrackerOptions {
    pub filter: SharedFilter,
    pub tick_delay: Duration,
    pub duplicate_policy: DuplicatePolicy,
    pub transfer: Arc<dyn ContentTransfer>,
    pub hasher: Arc<ContentHasher>,
    /// Subscribe to live notifications on start. Sweeps run regardless.
    pub watch: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            filter: Arc::new(TrackAll),
            tick_delay: DEFAULT_TICK_DELAY,
            duplicate_policy: DuplicatePolicy::default(),
            transfer: Arc::new(LoggingTransfer),
            hasher: Arc::new(ContentHasher::new()),
            watch: true,
        }
    }
}

/// Tasks queued by [`FileTracker::start`]'s sweeps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    pub extras: usize,
    pub changes: usize,
}

/// Keeps one catalog in step with its root directory.
pub struct FileTracker {
    catalog: Catalog,
    store: SharedStore,
    fs: Arc<dyn FileSystem>,
    filter: SharedFilter,
    watch: bool,
    engine: Arc<TaskEngine<TrackerTask>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watch_errors: Arc<AtomicU64>,
}

impl FileTracker {
    pub fn new(
        catalog: Catalog,
        store: SharedStore,
        fs: Arc<dyn FileSystem>,
        options: TrackerOptions,
    ) -> Self {
        let delta = DeltaEngine::with_transfer(store.clone(), options.transfer.clone());
        let work_queue = Arc::new(TrackerWorkQueue::new(
            catalog.clone(),
            delta,
            fs.clone(),
            options.filter.clone(),
            options.hasher.clone(),
            options.duplicate_policy,
        ));
        let hooks = TaskHooks::new(work_queue.clone())
            .admission(work_queue.clone())
            .on_error(work_queue.clone())
            .on_idle(work_queue);
        let queue = PriorityQueue::new(TrackerTask::is_higher_priority).shared();
        let engine = TaskEngine::new(
            format!("tracker-{}", catalog.id),
            queue,
            options.tick_delay,
            hooks,
        );

        Self {
            catalog,
            store,
            fs,
            filter: options.filter,
            watch: options.watch,
            engine: Arc::new(engine),
            watcher: Mutex::new(None),
            watch_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn engine(&self) -> &TaskEngine<TrackerTask> {
        &self.engine
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn watch_errors(&self) -> u64 {
        self.watch_errors.load(Ordering::Relaxed)
    }

    /// Hands a task to the engine; returns whether it was queued.
    pub fn add(&self, task: TrackerTask) -> bool {
        self.engine.add(task)
    }

    /// Starts the engine and the watcher, then queues the extras sweep and
    /// the changes scan.
    pub fn start(&self) -> Result<StartReport> {
        let root = self.catalog.root().to_path_buf();
        if !self.fs.stat(&root).map(|s| s.is_dir()).unwrap_or(false) {
            return Err(Error::invalid(format!("{} is not a directory", root.display())));
        }

        self.engine.start()?;
        if self.watch {
            self.start_watcher(&root)?;
        }

        let report = StartReport {
            extras: self.queue_extras()?,
            changes: self.queue_changes()?,
        };
        info!(
            "Tracking {} (catalog {}): {} extras, {} changes queued",
            self.catalog.path, self.catalog.id, report.extras, report.changes
        );
        Ok(report)
    }

    pub fn stop(&self) {
        if lock(&self.watcher).take().is_some() {
            debug!("Stopped watching {}", self.catalog.path);
        }
        self.engine.stop();
    }

    fn start_watcher(&self, root: &std::path::Path) -> Result<()> {
        let mut slot = lock(&self.watcher);
        if slot.is_some() {
            return Ok(());
        }

        let engine = Arc::clone(&self.engine);
        let errors = Arc::clone(&self.watch_errors);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for task in map_event(event) {
                    engine.add(task);
                }
            }
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                warn!("Watch error: {}", e);
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        *slot = Some(watcher);
        debug!("Watching {}", root.display());
        Ok(())
    }

    /// Queues a `Deleted` task for every live entry missing on disk. A
    /// missing directory covers its descendants; an unreadable path is not
    /// missing.
    pub fn queue_extras(&self) -> Result<usize> {
        let mut entries = {
            let store = storage::lock(&self.store);
            store.entries(self.catalog.id, Visibility::Live)?
        };
        entries.sort_by_key(|e| e.path_key());

        let mut missing_dirs: Vec<String> = Vec::new();
        let mut queued = 0;
        for entry in entries {
            let path_key = entry.path_key();
            if missing_dirs.iter().any(|dir| path_key.starts_with(dir.as_str())) {
                continue;
            }
            let absolute = self.catalog.absolute_path(&entry.path());
            match self.fs.stat(&absolute) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Keeping unreadable {}: {}", absolute.display(), e);
                    continue;
                }
            }
            if entry.is_dir() {
                missing_dirs.push(entry.child_parent().to_ascii_lowercase());
            }
            if self.engine.add(TrackerTask::deleted(absolute, TaskSource::ExtrasScan)) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// An unindexed catalog queues its root's children for trickle
    /// discovery; an indexed one queues a `Changed` task for every path that
    /// differs from its entry.
    pub fn queue_changes(&self) -> Result<usize> {
        let is_indexed = {
            let store = storage::lock(&self.store);
            store
                .catalog(self.catalog.id)?
                .ok_or(Error::CatalogNotFound(self.catalog.id))?
                .is_indexed
        };

        let mut queued = 0;
        if !is_indexed {
            for child in self.fs.read_dir(self.catalog.root())? {
                if self.engine.add(TrackerTask::created(child, TaskSource::ChangesScan)) {
                    queued += 1;
                }
            }
            return Ok(queued);
        }

        let known: HashMap<String, CatalogEntry> = {
            let store = storage::lock(&self.store);
            store
                .entries(self.catalog.id, Visibility::Live)?
                .into_iter()
                .map(|e| (e.path_key(), e))
                .collect()
        };

        let root = self.catalog.root().to_path_buf();
        let mut excluded: Vec<PathBuf> = Vec::new();
        for item in self.fs.walk(&root) {
            let (path, stat) = match item {
                Ok(item) => item,
                Err(e) if e.is_unreadable() => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if excluded.iter().any(|dir| path.starts_with(dir)) {
                continue;
            }
            if !self.filter.is_tracked(&path, stat.attributes) {
                if stat.is_dir() {
                    excluded.push(path);
                }
                continue;
            }

            let relative = self.catalog.relative_path(&path)?;
            let observed = CatalogEntry::from_stat(self.catalog.id, &relative, &stat, None);
            let differs = match known.get(&observed.path_key()) {
                Some(entry) => {
                    entry.attributes != observed.attributes
                        || entry.length != observed.length
                        || normalize_date(entry.modified) != observed.modified
                }
                None => true,
            };
            if differs && self.engine.add(TrackerTask::changed(path, TaskSource::ChangesScan)) {
                queued += 1;
            }
        }
        Ok(queued)
    }
}

impl Drop for FileTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FileTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTracker")
            .field("catalog", &self.catalog)
            .field("engine", &self.engine)
            .field("watch_errors", &self.watch_errors())
            .finish()
    }
}
