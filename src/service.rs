use crate::config::AppConfig;
use crate::error::Result;
use crate::filter::SharedFilter;
use crate::hasher::ContentHasher;
use crate::scanner::FileSystem;
use crate::storage::{self, SharedStore};
use crate::tracker::{FileTracker, StartReport, TrackerOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// One [`FileTracker`] per configured root, sharing a store and hasher.
pub struct TrackerService {
    trackers: Vec<FileTracker>,
}

impl TrackerService {
    /// Registers a catalog for every configured root that does not have one.
    pub fn new(config: &AppConfig, store: SharedStore, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let filter: SharedFilter = Arc::new(config.file_filter());
        let hasher = Arc::new(ContentHasher::new());
        let mut trackers = Vec::new();

        for root in config.roots() {
            let path = canonical_root(&root.path);
            let catalog = {
                let mut guard = storage::lock(&store);
                storage::ensure_catalog(&mut *guard, &root.display_name(), &path)?
            };
            let options = TrackerOptions {
                filter: filter.clone(),
                tick_delay: config.tick_delay(),
                duplicate_policy: config.duplicate_policy,
                hasher: hasher.clone(),
                ..TrackerOptions::default()
            };
            trackers.push(FileTracker::new(catalog, store.clone(), fs.clone(), options));
        }

        if trackers.is_empty() {
            warn!("No roots configured; nothing to track");
        }
        Ok(Self { trackers })
    }

    pub fn trackers(&self) -> &[FileTracker] {
        &self.trackers
    }

    /// Starts every tracker. A root that fails to start is logged and
    /// skipped so the others keep running.
    pub fn start(&self) -> Vec<StartReport> {
        let mut reports = Vec::with_capacity(self.trackers.len());
        for tracker in &self.trackers {
            match tracker.start() {
                Ok(report) => reports.push(report),
                Err(e) => error!("Failed to start tracking {}: {}", tracker.catalog().path, e),
            }
        }
        info!("{} of {} trackers running", reports.len(), self.trackers.len());
        reports
    }

    pub fn stop(&self) {
        for tracker in &self.trackers {
            tracker.stop();
        }
    }
}

/// Watchers report canonical paths, so roots are canonicalized up front.
pub fn canonical_root(path: &str) -> String {
    match std::fs::canonicalize(Path::new(path)) {
        Ok(canonical) => canonical.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Could not canonicalize root {}: {}", path, e);
            path.to_string()
        }
    }
}
