//! Turns tracker tasks into catalog operations.

use super::task::{ChangeType, TrackerTask, MAX_RETRY};
use crate::delta::{DeltaAction, DeltaEngine};
use crate::error::{Error, Result};
use crate::filter::SharedFilter;
use crate::hasher::ContentHasher;
use crate::model::{Catalog, CatalogEntry, FileAttributes};
use crate::queue::PriorityQueue;
use crate::scanner::{FileStat, FileSystem};
use crate::scheduler::{AdmissionFilter, ErrorHandler, Executor, IdleHandler};
use crate::storage;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// What happens when a task arrives for a path that already has one queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The queued task stays; the newcomer is dropped.
    Reject,
    /// The newcomer replaces queued tasks it strictly outranks and is
    /// dropped otherwise.
    #[default]
    ReplaceLowerPriority,
}

pub struct TrackerWorkQueue {
    catalog: Catalog,
    delta: DeltaEngine,
    fs: Arc<dyn FileSystem>,
    filter: SharedFilter,
    hasher: Arc<ContentHasher>,
    policy: DuplicatePolicy,
    indexed: AtomicBool,
}

impl TrackerWorkQueue {
    pub fn new(
        catalog: Catalog,
        delta: DeltaEngine,
        fs: Arc<dyn FileSystem>,
        filter: SharedFilter,
        hasher: Arc<ContentHasher>,
        policy: DuplicatePolicy,
    ) -> Self {
        let indexed = AtomicBool::new(catalog.is_indexed);
        Self {
            catalog,
            delta,
            fs,
            filter,
            hasher,
            policy,
            indexed,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    fn relative(&self, path: &Path) -> Result<String> {
        self.catalog.relative_path(path)
    }

    /// Attributes of `path` from disk, or from the catalog once it is gone.
    fn attributes_of(&self, path: &Path) -> FileAttributes {
        if let Ok(stat) = self.fs.stat(path) {
            return stat.attributes;
        }
        let Ok(relative) = self.relative(path) else {
            return FileAttributes::NONE;
        };
        let (parent, name) = crate::model::split_path(&relative);
        let store = storage::lock(self.delta.store());
        match store.live_entry(self.catalog.id, &parent, &name) {
            Ok(Some(entry)) => entry.attributes,
            _ => FileAttributes::NONE,
        }
    }

    fn is_tracked(&self, path: &Path) -> bool {
        match self.relative(path) {
            Ok(relative) if relative != "/" => {}
            _ => return false,
        }
        self.filter.is_tracked(path, self.attributes_of(path))
    }

    /// Applies the rename rules: a rename across the filter boundary becomes
    /// a create or a delete.
    fn normalize(&self, task: TrackerTask) -> Option<TrackerTask> {
        if task.change_type != ChangeType::Renamed {
            return self.is_tracked(&task.full_path).then_some(task);
        }

        let Some(old) = task.old_full_path.clone() else {
            // Malformed; let execution reject it.
            return Some(task);
        };
        let new_tracked = self.is_tracked(&task.full_path);
        let old_tracked = self.is_tracked(&old);
        match (old_tracked, new_tracked) {
            (true, true) => Some(task),
            (false, true) => {
                let new = task.full_path.clone();
                Some(task.rewrite(ChangeType::Created, &new))
            }
            (true, false) => Some(task.rewrite(ChangeType::Deleted, &old)),
            (false, false) => None,
        }
    }

    fn execute_delete(&self, task: &TrackerTask) -> Result<Vec<TrackerTask>> {
        if self.fs.exists(&task.full_path) {
            debug!("{} exists again; syncing instead of deleting", task.full_path.display());
            return self.sync_path(task, false);
        }
        let relative = self.relative(&task.full_path)?;
        let removed = self.delta.delete_by_path(self.catalog.id, &relative)?;
        self.hasher.invalidate_tree(&task.full_path);
        trace!(path = %relative, removed, "Processed delete");
        Ok(Vec::new())
    }

    fn execute_rename(&self, task: &TrackerTask) -> Result<Vec<TrackerTask>> {
        let old = task
            .old_full_path
            .as_deref()
            .ok_or_else(|| Error::invalid(format!("rename of {} has no source path", task.full_path.display())))?;
        let old_relative = self.relative(old)?;
        let new_relative = self.relative(&task.full_path)?;

        if !self.fs.exists(&task.full_path) {
            // Renamed again before we got here; only the removal is certain.
            if !self.fs.exists(old) {
                self.delta.delete_by_path(self.catalog.id, &old_relative)?;
            }
            self.hasher.invalidate_tree(old);
            return Ok(Vec::new());
        }

        let moved = self
            .delta
            .move_entry(self.catalog.id, &old_relative, &new_relative)?;
        self.hasher.invalidate_tree(old);
        if moved {
            debug!(from = %old_relative, to = %new_relative, "Moved entry");
            self.sync_path(task, false)
        } else {
            debug!("{} not in catalog; treating rename as create", old_relative);
            self.sync_path(task, true)
        }
    }

    /// Syncs the entry at `task.full_path` with disk. With `discover` set, a
    /// directory queues a `Created` task for each immediate child.
    fn sync_path(&self, task: &TrackerTask, discover: bool) -> Result<Vec<TrackerTask>> {
        let path = &task.full_path;
        let stat = match self.fs.stat(path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let relative = self.relative(path)?;
                self.delta.delete_by_path(self.catalog.id, &relative)?;
                self.hasher.invalidate_tree(path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if !self.filter.is_tracked(path, stat.attributes) {
            trace!("{} is filtered out", path.display());
            return Ok(Vec::new());
        }

        let relative = self.relative(path)?;
        let candidate = self.candidate(&relative, path, &stat)?;
        let action = self.delta.sync_entry(&candidate)?;
        if action != DeltaAction::None {
            debug!(
                catalog_id = self.catalog.id,
                path = %relative,
                change_type = ?task.change_type,
                action = %action,
                "Applied change"
            );
        }

        if !(discover && stat.is_dir()) {
            return Ok(Vec::new());
        }
        let children = self.fs.read_dir(path)?;
        Ok(children
            .into_iter()
            .map(|child| TrackerTask::created(child, task.source))
            .collect())
    }

    /// Builds the observed entry, hashing only when the catalog's copy does
    /// not already describe these bytes.
    fn candidate(&self, relative: &str, path: &Path, stat: &FileStat) -> Result<CatalogEntry> {
        if stat.is_dir() {
            return Ok(CatalogEntry::from_stat(self.catalog.id, relative, stat, None));
        }
        let observed = CatalogEntry::from_stat(self.catalog.id, relative, stat, None);
        let known = {
            let store = storage::lock(self.delta.store());
            store.live_entry(self.catalog.id, &observed.parent, &observed.name)?
        };
        let signature = match known {
            Some(entry)
                if !entry.signature.is_empty()
                    && entry.length == observed.length
                    && entry.modified == observed.modified
                    && entry.attributes == observed.attributes =>
            {
                entry.signature
            }
            _ => self.hasher.signature(self.fs.as_ref(), path, stat)?,
        };
        Ok(CatalogEntry::from_stat(self.catalog.id, relative, stat, Some(signature)))
    }

    fn mark_indexed(&self) -> Result<()> {
        let mut store = storage::lock(self.delta.store());
        let Some(mut catalog) = store.catalog(self.catalog.id)? else {
            return Err(Error::CatalogNotFound(self.catalog.id));
        };
        if !catalog.is_indexed {
            catalog.is_indexed = true;
            store.update_catalog(&catalog)?;
            store.save()?;
            info!("Catalog {} '{}' is fully indexed", catalog.id, catalog.name);
        }
        Ok(())
    }
}

impl Executor<TrackerTask> for TrackerWorkQueue {
    fn execute(&self, task: &TrackerTask) -> Result<Vec<TrackerTask>> {
        trace!("Executing {}", task);
        match task.change_type {
            ChangeType::Deleted => self.execute_delete(task),
            ChangeType::Renamed => self.execute_rename(task),
            ChangeType::Created => self.sync_path(task, true),
            ChangeType::Changed => self.sync_path(task, false),
        }
    }
}

impl AdmissionFilter<TrackerTask> for TrackerWorkQueue {
    fn admit(&self, task: TrackerTask, queue: &mut PriorityQueue<TrackerTask>) -> Option<TrackerTask> {
        let Some(task) = self.normalize(task) else {
            trace!("Filtered task dropped");
            return None;
        };

        if !fold_rename_halves(&task, queue) {
            trace!("{} is covered by a queued rename", task);
            return None;
        }

        let key = task.path_key();
        let same_path = |queued: &TrackerTask| queued.path_key() == key;
        if !queue.contains(same_path) {
            return Some(task);
        }

        match self.policy {
            DuplicatePolicy::Reject => {
                trace!("Duplicate rejected: {}", task);
                None
            }
            DuplicatePolicy::ReplaceLowerPriority => {
                let incoming = task.priority();
                let outranked = queue
                    .find(same_path)
                    .into_iter()
                    .any(|queued| queued.priority() >= incoming);
                if outranked {
                    trace!("Duplicate rejected: {}", task);
                    return None;
                }
                let replaced = queue.remove(same_path);
                trace!("{} replaced {} queued task(s)", task, replaced.len());
                Some(task)
            }
        }
    }
}

/// Some watchers report a rename as a remove of the old path and a create
/// of the new one around the paired event. The pair supersedes both halves
/// so the entry is moved rather than deleted and rediscovered: an arriving
/// rename absorbs its queued halves, and a late remove of a queued rename's
/// source is dropped. Returns false when `task` itself is dropped.
fn fold_rename_halves(task: &TrackerTask, queue: &mut PriorityQueue<TrackerTask>) -> bool {
    match task.change_type {
        ChangeType::Renamed => {
            let Some(old_key) = task.old_path_key() else {
                return true;
            };
            let new_key = task.path_key();
            let absorbed = queue.remove(|queued| {
                queued.source == task.source
                    && queued.retry_count == 0
                    && match queued.change_type {
                        ChangeType::Deleted => queued.path_key() == old_key,
                        ChangeType::Created => queued.path_key() == new_key,
                        _ => false,
                    }
            });
            if !absorbed.is_empty() {
                trace!("{} absorbed {} queued task(s)", task, absorbed.len());
            }
            true
        }
        ChangeType::Deleted => {
            let key = task.path_key();
            !queue.contains(|queued| {
                queued.change_type == ChangeType::Renamed
                    && queued.source == task.source
                    && queued.old_path_key().as_deref() == Some(key.as_str())
            })
        }
        _ => true,
    }
}

impl ErrorHandler<TrackerTask> for TrackerWorkQueue {
    fn on_error(&self, task: TrackerTask, err: &Error) -> Option<TrackerTask> {
        if err.is_invalid_argument() {
            error!(
                path = %task.full_path.display(),
                change_type = ?task.change_type,
                "Dropping invalid task: {}",
                err
            );
            return None;
        }
        if task.retry_count < MAX_RETRY {
            warn!(
                path = %task.full_path.display(),
                change_type = ?task.change_type,
                retry_count = task.retry_count,
                transient = err.is_transient(),
                "Task failed, will retry: {}",
                err
            );
            return Some(task.retried());
        }
        warn!(
            path = %task.full_path.display(),
            change_type = ?task.change_type,
            retry_count = task.retry_count,
            "Task failed after {} retries, dropping: {}",
            MAX_RETRY,
            err
        );
        None
    }
}

impl IdleHandler for TrackerWorkQueue {
    fn on_idle(&self) {
        if self.indexed.load(Ordering::Acquire) {
            return;
        }
        match self.mark_indexed() {
            Ok(()) => self.indexed.store(true, Ordering::Release),
            Err(e) => error!("Failed to mark catalog {} indexed: {}", self.catalog.id, e),
        }
    }
}
