use crate::error::Result;
use crate::filter::FileFilter;
use crate::hasher::ContentHasher;
use crate::model::{Catalog, CatalogEntry};
use crate::progress::ProgressReporter;
use crate::scanner::{FileStat, FileSystem};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error};

const WALK_PROGRESS_INTERVAL: usize = 500;

/// Entries observed on disk for one catalog root.
#[derive(Debug, Default)]
pub struct TreeSnapshot {
    pub entries: Vec<CatalogEntry>,
    /// Paths that could not be read or hashed and were left out. A skipped
    /// directory stands for everything below it.
    pub skipped: Vec<PathBuf>,
}

/// Walks the catalog root and builds a candidate entry for every tracked
/// path. Files are hashed on the rayon pool. Unreadable paths are logged and
/// skipped; a directory excluded by the filter excludes its whole subtree.
pub fn snapshot_tree(
    catalog: &Catalog,
    fs: &dyn FileSystem,
    filter: &dyn FileFilter,
    hasher: &ContentHasher,
    reporter: &dyn ProgressReporter,
) -> Result<TreeSnapshot> {
    let root = catalog.root().to_path_buf();
    reporter.on_walk_start(&catalog.path);
    let walk_start = Instant::now();

    let mut excluded_dirs: Vec<PathBuf> = Vec::new();
    let mut found: Vec<(String, PathBuf, FileStat)> = Vec::new();
    let mut skipped: Vec<PathBuf> = Vec::new();

    for item in fs.walk(&root) {
        let (path, stat) = match item {
            Ok(item) => item,
            Err(err) if err.is_unreadable() => {
                error!("Skipping unreadable entry under {}: {}", root.display(), err);
                if let Some(path) = err.path {
                    skipped.push(path);
                }
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if excluded_dirs.iter().any(|dir| path.starts_with(dir)) {
            continue;
        }
        if !filter.is_tracked(&path, stat.attributes) {
            if stat.is_dir() {
                excluded_dirs.push(path);
            }
            continue;
        }

        let relative = catalog.relative_path(&path)?;
        found.push((relative, path, stat));
        if found.len() % WALK_PROGRESS_INTERVAL == 0 {
            reporter.on_walk_progress(found.len(), &found[found.len() - 1].0);
        }
    }
    reporter.on_walk_complete(found.len(), walk_start.elapsed().as_secs_f64());

    let total_files = found.iter().filter(|(_, _, stat)| !stat.is_dir()).count();
    reporter.on_hash_start(total_files);
    let hash_start = Instant::now();
    let hashed = AtomicUsize::new(0);

    let results: Vec<std::result::Result<CatalogEntry, PathBuf>> = found
        .par_iter()
        .map(|(relative, path, stat)| {
            if stat.is_dir() {
                return Ok(CatalogEntry::from_stat(catalog.id, relative, stat, None));
            }
            match hasher.signature(fs, path, stat) {
                Ok(signature) => {
                    let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
                    reporter.on_hash_progress(done, total_files);
                    Ok(CatalogEntry::from_stat(catalog.id, relative, stat, Some(signature)))
                }
                Err(e) => {
                    error!("Error hashing file '{}': {}", path.display(), e);
                    Err(path.clone())
                }
            }
        })
        .collect();

    let mut entries = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(entry) => entries.push(entry),
            Err(path) => skipped.push(path),
        }
    }

    let files_hashed = hashed.load(Ordering::Relaxed);
    reporter.on_hash_complete(files_hashed, hash_start.elapsed().as_secs_f64());
    debug!(
        "Snapshot of {} complete: {} entries, {} files hashed, {} skipped",
        catalog.path,
        entries.len(),
        files_hashed,
        skipped.len()
    );

    Ok(TreeSnapshot { entries, skipped })
}
