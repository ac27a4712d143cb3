/// Trait for reporting reconcile progress.
///
/// CLI implements with indicatif progress bars; tests use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_walk_start(&self, _root: &str) {}
    fn on_walk_progress(&self, _entries_found: usize, _current_path: &str) {}
    fn on_walk_complete(&self, _total_entries: usize, _duration_secs: f64) {}
    fn on_hash_start(&self, _total_files: usize) {}
    fn on_hash_progress(&self, _files_hashed: usize, _total_files: usize) {}
    fn on_hash_complete(&self, _files_hashed: usize, _duration_secs: f64) {}
    fn on_apply_start(&self, _total_actions: usize) {}
    fn on_apply_progress(&self, _applied: usize, _total_actions: usize) {}
    fn on_apply_complete(&self, _applied: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
