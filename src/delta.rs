//! Match-finding and the actions that reconcile one observed entry with the
//! catalog.

use crate::error::{Error, Result};
use crate::model::{normalize_date, split_path, CatalogEntry};
use crate::storage::{self, CatalogStore, SharedStore, Visibility};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How an existing entry relates to a candidate. Higher ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchRank {
    None = 0x00,
    Hash = 0x01,
    Path = 0x02,
    Both = 0x03,
}

impl MatchRank {
    fn from_bits(path: bool, hash: bool) -> Self {
        match (path, hash) {
            (true, true) => MatchRank::Both,
            (true, false) => MatchRank::Path,
            (false, true) => MatchRank::Hash,
            (false, false) => MatchRank::None,
        }
    }

    pub fn has_path(self) -> bool {
        (self as u8) & (MatchRank::Path as u8) != 0
    }

    pub fn has_hash(self) -> bool {
        (self as u8) & (MatchRank::Hash as u8) != 0
    }

    /// Rank of `existing` against `candidate`. Two directories at the same
    /// path count as a content match; directories never match by content
    /// across paths.
    pub fn of(candidate: &CatalogEntry, existing: &CatalogEntry) -> Self {
        let path = candidate.path_key() == existing.path_key();
        let hash = if candidate.is_dir() || existing.is_dir() {
            path && candidate.is_dir() && existing.is_dir()
        } else {
            !candidate.signature.is_empty() && candidate.signature == existing.signature
        };
        MatchRank::from_bits(path, hash)
    }
}

/// Declaration order is application order during reconciliation: clones
/// land before the deletes that might remove their source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeltaAction {
    None,
    Meta,
    Update,
    Clone,
    Add,
    Delete,
}

impl fmt::Display for DeltaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeltaAction::None => "none",
            DeltaAction::Meta => "meta",
            DeltaAction::Update => "update",
            DeltaAction::Clone => "clone",
            DeltaAction::Add => "add",
            DeltaAction::Delete => "delete",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedMatch {
    pub rank: MatchRank,
    pub entry: CatalogEntry,
}

/// One decided action.
#[derive(Debug, Clone)]
pub struct Delta {
    pub action: DeltaAction,
    /// The observed state. For `Delete` this is the entry being removed.
    pub entry: CatalogEntry,
    /// The stored entry the action applies to, when there is one.
    pub matched: Option<CatalogEntry>,
    /// A stored entry with the same content that an `Update` can copy from.
    pub source: Option<CatalogEntry>,
}

impl Delta {
    pub fn path(&self) -> String {
        self.entry.path()
    }
}

/// Moves file content into place for `Add` and `Update`. The catalog only
/// records the decision; how bytes travel is up to the implementation.
pub trait ContentTransfer: Send + Sync {
    fn transfer(&self, target: &CatalogEntry, source: Option<&CatalogEntry>) -> Result<()>;
}

/// Records the transfer that would happen and moves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransfer;

impl ContentTransfer for LoggingTransfer {
    fn transfer(&self, target: &CatalogEntry, source: Option<&CatalogEntry>) -> Result<()> {
        match source {
            Some(source) => info!(
                "Transfer {} ({} bytes) from local copy {}",
                target.path(),
                target.length,
                source.path()
            ),
            None => info!("Transfer {} ({} bytes)", target.path(), target.length),
        }
        Ok(())
    }
}

/// Totals from applying a batch of deltas.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub none: usize,
    pub meta: usize,
    pub update: usize,
    pub clone: usize,
    pub add: usize,
    pub delete: usize,
    pub failed: usize,
}

impl ApplySummary {
    fn record(&mut self, action: DeltaAction) {
        match action {
            DeltaAction::None => self.none += 1,
            DeltaAction::Meta => self.meta += 1,
            DeltaAction::Update => self.update += 1,
            DeltaAction::Clone => self.clone += 1,
            DeltaAction::Add => self.add += 1,
            DeltaAction::Delete => self.delete += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.meta + self.update + self.clone + self.add + self.delete
    }
}

#[derive(Clone)]
pub struct DeltaEngine {
    store: SharedStore,
    transfer: Arc<dyn ContentTransfer>,
}

impl fmt::Debug for DeltaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaEngine").finish_non_exhaustive()
    }
}

impl DeltaEngine {
    pub fn new(store: SharedStore) -> Self {
        Self::with_transfer(store, Arc::new(LoggingTransfer))
    }

    pub fn with_transfer(store: SharedStore, transfer: Arc<dyn ContentTransfer>) -> Self {
        Self { store, transfer }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// The best two matches for `candidate` among live and soft-deleted
    /// entries, best first.
    pub fn find_match(&self, candidate: &CatalogEntry) -> Result<Vec<RankedMatch>> {
        let store = storage::lock(&self.store);
        find_match(&*store, candidate)
    }

    pub fn compute_delta(&self, candidate: &CatalogEntry) -> Result<Delta> {
        let store = storage::lock(&self.store);
        compute_delta(&*store, candidate)
    }

    /// Applies one delta and commits it.
    pub fn apply(&self, delta: &Delta) -> Result<Option<CatalogEntry>> {
        let mut store = storage::lock(&self.store);
        let stored = apply_delta(&mut *store, self.transfer.as_ref(), delta)?;
        store.save()?;
        Ok(stored)
    }

    /// Computes and applies the delta for `candidate`, returning the action.
    pub fn sync_entry(&self, candidate: &CatalogEntry) -> Result<DeltaAction> {
        let mut store = storage::lock(&self.store);
        let delta = compute_delta(&*store, candidate)?;
        apply_delta(&mut *store, self.transfer.as_ref(), &delta)?;
        store.save()?;
        debug!(
            catalog_id = candidate.catalog_id,
            path = %candidate.path(),
            action = %delta.action,
            "Synced entry"
        );
        Ok(delta.action)
    }

    /// Soft-deletes the live entry at `relative_path` and, for a directory,
    /// every live descendant. Returns `false` when nothing lives there.
    pub fn delete_by_path(&self, catalog_id: i64, relative_path: &str) -> Result<bool> {
        let (parent, name) = checked_split(relative_path)?;
        let mut store = storage::lock(&self.store);
        let Some(entry) = store.live_entry(catalog_id, &parent, &name)? else {
            return Ok(false);
        };
        let removed = soft_delete(&mut *store, &entry)?;
        store.save()?;
        debug!(catalog_id, path = relative_path, removed, "Deleted entry");
        Ok(true)
    }

    /// Reparents the live entry at `old_path` to `new_path`, rewriting the
    /// parent of every descendant of a directory. Returns `false` when the
    /// source does not exist.
    pub fn move_entry(&self, catalog_id: i64, old_path: &str, new_path: &str) -> Result<bool> {
        let (old_parent, old_name) = checked_split(old_path)?;
        let (new_parent, new_name) = checked_split(new_path)?;
        let mut store = storage::lock(&self.store);
        let Some(mut entry) = store.live_entry(catalog_id, &old_parent, &old_name)? else {
            return Ok(false);
        };

        retire_occupant(&mut *store, catalog_id, &new_parent, &new_name, entry.id)?;

        let old_prefix = entry.child_parent();
        entry.parent = new_parent;
        entry.name = new_name;
        let new_prefix = entry.child_parent();
        store.update_entry(&entry)?;

        let mut moved = 0usize;
        if entry.is_dir() {
            for mut child in store.entries_under(catalog_id, &old_prefix, Visibility::IncludeDeleted)? {
                let rest: String = child.parent.chars().skip(old_prefix.chars().count()).collect();
                child.parent = format!("{}{}", new_prefix, rest);
                store.update_entry(&child)?;
                moved += 1;
            }
        }
        store.save()?;
        debug!(catalog_id, from = old_path, to = new_path, descendants = moved, "Moved entry");
        Ok(true)
    }

    /// Deltas that turn the catalog into `targets`: one per target that is
    /// not already current, and a `Delete` for every live entry whose path is
    /// absent from `targets`. Sorted into application order.
    pub fn reconcile(&self, catalog_id: i64, targets: &[CatalogEntry]) -> Result<Vec<Delta>> {
        let store = storage::lock(&self.store);
        let mut deltas = Vec::new();
        let mut seen: HashSet<String> = HashSet::with_capacity(targets.len());

        for target in targets {
            if target.catalog_id != catalog_id {
                return Err(Error::invalid(format!(
                    "{} belongs to catalog {}, not {}",
                    target.path(),
                    target.catalog_id,
                    catalog_id
                )));
            }
            seen.insert(target.path_key());
            let delta = compute_delta(&*store, target)?;
            if delta.action != DeltaAction::None {
                deltas.push(delta);
            }
        }

        for local in store.entries(catalog_id, Visibility::Live)? {
            if !seen.contains(&local.path_key()) {
                deltas.push(Delta {
                    action: DeltaAction::Delete,
                    entry: local.clone(),
                    matched: Some(local),
                    source: None,
                });
            }
        }

        deltas.sort_by(|a, b| a.action.cmp(&b.action));
        Ok(deltas)
    }

    /// Applies `deltas` in order and commits once. A failing delta is logged
    /// and counted; the rest still apply.
    pub fn apply_all(&self, deltas: &[Delta], mut on_applied: impl FnMut(usize)) -> Result<ApplySummary> {
        let mut store = storage::lock(&self.store);
        let mut summary = ApplySummary::default();
        for (i, delta) in deltas.iter().enumerate() {
            match apply_delta(&mut *store, self.transfer.as_ref(), delta) {
                Ok(_) => summary.record(delta.action),
                Err(e) => {
                    warn!("Failed to apply {} for {}: {}", delta.action, delta.path(), e);
                    summary.failed += 1;
                }
            }
            on_applied(i + 1);
        }
        store.save()?;
        Ok(summary)
    }
}

pub fn find_match(store: &dyn CatalogStore, candidate: &CatalogEntry) -> Result<Vec<RankedMatch>> {
    let mut found: Vec<CatalogEntry> = store.entries_at_path(
        candidate.catalog_id,
        &candidate.parent,
        &candidate.name,
        Visibility::IncludeDeleted,
    )?;
    if !candidate.is_dir() && !candidate.signature.is_empty() {
        for entry in store.entries_with_signature(
            candidate.catalog_id,
            &candidate.signature,
            Visibility::IncludeDeleted,
        )? {
            if !entry.is_dir() && !found.iter().any(|f| f.id == entry.id) {
                found.push(entry);
            }
        }
    }

    let mut ranked: Vec<RankedMatch> = found
        .into_iter()
        .map(|entry| RankedMatch {
            rank: MatchRank::of(candidate, &entry),
            entry,
        })
        .filter(|m| m.rank != MatchRank::None)
        .collect();
    ranked.sort_by(compare_matches);
    ranked.truncate(2);
    Ok(ranked)
}

/// Rank descending, then live before deleted, then most recently deleted.
fn compare_matches(a: &RankedMatch, b: &RankedMatch) -> Ordering {
    b.rank
        .cmp(&a.rank)
        .then_with(|| match (a.entry.deleted, b.entry.deleted) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        })
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

pub fn compute_delta(store: &dyn CatalogStore, candidate: &CatalogEntry) -> Result<Delta> {
    let mut matches = find_match(store, candidate)?.into_iter();
    let Some(best) = matches.next() else {
        return Ok(Delta {
            action: DeltaAction::Add,
            entry: candidate.clone(),
            matched: None,
            source: None,
        });
    };
    let runner_up = matches.next();

    let (action, source) = match best.rank {
        MatchRank::Both if best.entry.is_deleted() || !best.entry.value_eq(candidate) => {
            (DeltaAction::Meta, None)
        }
        MatchRank::Both => (DeltaAction::None, None),
        MatchRank::Hash if candidate.is_dir() => (DeltaAction::Add, None),
        MatchRank::Hash => (DeltaAction::Clone, None),
        MatchRank::Path => {
            let source = runner_up.filter(|m| m.rank.has_hash()).map(|m| m.entry);
            (DeltaAction::Update, source)
        }
        MatchRank::None => (DeltaAction::Add, None),
    };

    let matched = match action {
        DeltaAction::Add => None,
        _ => Some(best.entry),
    };
    Ok(Delta {
        action,
        entry: candidate.clone(),
        matched,
        source,
    })
}

/// Applies `delta` without committing; returns the stored entry it produced
/// or touched.
pub fn apply_delta(
    store: &mut dyn CatalogStore,
    transfer: &dyn ContentTransfer,
    delta: &Delta,
) -> Result<Option<CatalogEntry>> {
    let target = &delta.entry;
    match delta.action {
        DeltaAction::None => Ok(delta.matched.clone()),
        DeltaAction::Add => {
            if !target.is_dir() {
                transfer.transfer(target, None)?;
            }
            insert_at(store, target).map(Some)
        }
        DeltaAction::Clone => {
            let current = match &delta.matched {
                Some(m) => store.entry(m.id)?,
                None => None,
            };
            match current {
                // A soft-deleted copy is brought back at the new path.
                Some(deleted) if deleted.is_deleted() => overwrite(store, deleted, target).map(Some),
                _ => insert_at(store, target).map(Some),
            }
        }
        DeltaAction::Meta | DeltaAction::Update => {
            let matched = delta
                .matched
                .as_ref()
                .ok_or_else(|| Error::invalid(format!("{} on {} without a match", delta.action, target.path())))?;
            let current = store.entry(matched.id)?.unwrap_or_else(|| matched.clone());
            if delta.action == DeltaAction::Update && !target.is_dir() {
                transfer.transfer(target, delta.source.as_ref())?;
            }
            overwrite(store, current, target).map(Some)
        }
        DeltaAction::Delete => {
            let current = match &delta.matched {
                Some(m) => store.entry(m.id)?,
                None => store.live_entry(target.catalog_id, &target.parent, &target.name)?,
            };
            match current {
                Some(entry) if !entry.is_deleted() => {
                    soft_delete(store, &entry)?;
                    Ok(store.entry(entry.id)?)
                }
                _ => Ok(None),
            }
        }
    }
}

fn insert_at(store: &mut dyn CatalogStore, target: &CatalogEntry) -> Result<CatalogEntry> {
    retire_occupant(store, target.catalog_id, &target.parent, &target.name, 0)?;
    let mut stored = target.clone();
    stored.deleted = None;
    stored.id = store.insert_entry(&stored)?;
    Ok(stored)
}

/// Makes `existing` live with `target`'s values.
fn overwrite(
    store: &mut dyn CatalogStore,
    mut existing: CatalogEntry,
    target: &CatalogEntry,
) -> Result<CatalogEntry> {
    let was_dir = existing.is_dir();
    let old_prefix = existing.child_parent();
    retire_occupant(store, target.catalog_id, &target.parent, &target.name, existing.id)?;

    if was_dir && !target.is_dir() && !existing.is_deleted() {
        for child in store.entries_under(existing.catalog_id, &old_prefix, Visibility::Live)? {
            mark_deleted(store, child)?;
        }
    }

    existing.copy_values_from(target);
    existing.deleted = None;
    store.update_entry(&existing)?;
    Ok(existing)
}

/// Soft-deletes whatever else lives at `parent + name`.
fn retire_occupant(
    store: &mut dyn CatalogStore,
    catalog_id: i64,
    parent: &str,
    name: &str,
    keep_id: i64,
) -> Result<()> {
    for occupant in store.entries_at_path(catalog_id, parent, name, Visibility::Live)? {
        if occupant.id != keep_id {
            debug!("Retiring {} to make room", occupant.path());
            soft_delete(store, &occupant)?;
        }
    }
    Ok(())
}

/// Soft-deletes `entry` and, for a directory, its live descendants. Returns
/// the number of entries marked.
fn soft_delete(store: &mut dyn CatalogStore, entry: &CatalogEntry) -> Result<usize> {
    let mut count = 0;
    if entry.is_dir() {
        for child in store.entries_under(entry.catalog_id, &entry.child_parent(), Visibility::Live)? {
            mark_deleted(store, child)?;
            count += 1;
        }
    }
    mark_deleted(store, entry.clone())?;
    Ok(count + 1)
}

fn mark_deleted(store: &mut dyn CatalogStore, mut entry: CatalogEntry) -> Result<()> {
    entry.deleted = Some(normalize_date(Utc::now()));
    store.update_entry(&entry)
}

fn checked_split(relative_path: &str) -> Result<(String, String)> {
    let (parent, name) = split_path(relative_path);
    if name.is_empty() {
        return Err(Error::invalid(format!("'{}' does not name an entry", relative_path)));
    }
    Ok((parent, name))
}
