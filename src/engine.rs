use crate::delta::{ApplySummary, ContentTransfer, Delta, DeltaAction, DeltaEngine, LoggingTransfer};
use crate::error::Result;
use crate::filter::{SharedFilter, TrackAll};
use crate::hasher::ContentHasher;
use crate::model::Catalog;
use crate::progress::ProgressReporter;
use crate::scanner::{snapshot_tree, FileSystem, LocalFileSystem};
use crate::storage::{self, SharedStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One-shot full reconciliation of a catalog against its root.
pub struct ReconcileEngine {
    store: SharedStore,
    fs: Arc<dyn FileSystem>,
    filter: SharedFilter,
    hasher: Arc<ContentHasher>,
    transfer: Arc<dyn ContentTransfer>,
}

#[derive(Debug)]
pub struct ReconcileResult {
    pub scan_duration: Duration,
    pub apply_duration: Duration,
    pub entries_scanned: usize,
    /// Paths that could not be read; their catalog entries were left alone.
    pub skipped: usize,
    pub deltas: Vec<Delta>,
    /// `None` for a dry run.
    pub applied: Option<ApplySummary>,
}

impl ReconcileResult {
    pub fn count(&self, action: DeltaAction) -> usize {
        self.deltas.iter().filter(|d| d.action == action).count()
    }
}

impl ReconcileEngine {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            fs: Arc::new(LocalFileSystem),
            filter: Arc::new(TrackAll),
            hasher: Arc::new(ContentHasher::new()),
            transfer: Arc::new(LoggingTransfer),
        }
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_filter(mut self, filter: SharedFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn ContentTransfer>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Run the full reconciliation pipeline:
    /// 1. Walk the root and hash every tracked file on the rayon pool
    /// 2. Compute deltas against the catalog, deletes last
    /// 3. Apply them in one unit of work and mark the catalog indexed
    pub fn reconcile(
        &self,
        catalog: &Catalog,
        dry_run: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<ReconcileResult> {
        info!("Reconciling {} (catalog {})", catalog.path, catalog.id);

        // Phase 1: Snapshot
        let scan_start = Instant::now();
        let snapshot = snapshot_tree(
            catalog,
            self.fs.as_ref(),
            self.filter.as_ref(),
            &self.hasher,
            reporter,
        )?;
        let scan_duration = scan_start.elapsed();
        debug!(
            "Snapshot completed in {:.2}s, {} entries, {} skipped",
            scan_duration.as_secs_f64(),
            snapshot.entries.len(),
            snapshot.skipped.len()
        );

        // Phase 2: Delta
        let delta = DeltaEngine::with_transfer(self.store.clone(), self.transfer.clone());
        let mut deltas = delta.reconcile(catalog.id, &snapshot.entries)?;
        if !snapshot.skipped.is_empty() {
            let unreadable = unreadable_keys(catalog, &snapshot.skipped);
            deltas.retain(|d| d.action != DeltaAction::Delete || !covers(&unreadable, &d.entry.path_key()));
        }

        if dry_run {
            info!("Dry run: {} actions computed, none applied", deltas.len());
            return Ok(ReconcileResult {
                scan_duration,
                apply_duration: Duration::ZERO,
                entries_scanned: snapshot.entries.len(),
                skipped: snapshot.skipped.len(),
                deltas,
                applied: None,
            });
        }

        // Phase 3: Apply
        let apply_start = Instant::now();
        reporter.on_apply_start(deltas.len());
        let total = deltas.len();
        let summary = delta.apply_all(&deltas, |done| reporter.on_apply_progress(done, total))?;
        self.mark_indexed(catalog)?;
        let apply_duration = apply_start.elapsed();
        reporter.on_apply_complete(summary.changed(), apply_duration.as_secs_f64());
        debug!(
            "Apply completed in {:.2}s, {} changed, {} failed",
            apply_duration.as_secs_f64(),
            summary.changed(),
            summary.failed
        );

        Ok(ReconcileResult {
            scan_duration,
            apply_duration,
            entries_scanned: snapshot.entries.len(),
            skipped: snapshot.skipped.len(),
            deltas,
            applied: Some(summary),
        })
    }

    fn mark_indexed(&self, catalog: &Catalog) -> Result<()> {
        let mut store = storage::lock(&self.store);
        if let Some(mut stored) = store.catalog(catalog.id)? {
            if !stored.is_indexed {
                stored.is_indexed = true;
                store.update_catalog(&stored)?;
                store.save()?;
            }
        }
        Ok(())
    }
}

/// Case-folded catalog paths of the skipped walk paths, without trailing
/// separators. The root folds to the empty key.
fn unreadable_keys(catalog: &Catalog, skipped: &[PathBuf]) -> Vec<String> {
    skipped
        .iter()
        .filter_map(|path| catalog.relative_path(path).ok())
        .map(|relative| relative.trim_end_matches('/').to_ascii_lowercase())
        .collect()
}

/// Whether `key` is one of `unreadable` or lies below one of them.
fn covers(unreadable: &[String], key: &str) -> bool {
    unreadable.iter().any(|dir| {
        key.strip_prefix(dir.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}
