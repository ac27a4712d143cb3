use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a previous holder panicked. The
/// tracking loops must outlive any single failed task.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops every directory nested in (or equal to) one kept earlier; a later
/// ancestor evicts its kept descendants.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for dir in dirs {
        let path = Path::new(&dir);
        if kept.iter().any(|k| path.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !Path::new(k).starts_with(path));
        kept.push(dir);
    }
    kept
}
