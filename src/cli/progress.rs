use catalog_tracker::utils::lock;
use catalog_tracker::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Walk phase: spinner (entry count unknown upfront)
/// - Hash phase: progress bar over the files found by the walk
/// - Apply phase: progress bar over the computed actions
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = lock(&self.bar);
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = lock(&self.bar).take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICK_CHARS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn bar(label: &str, total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        if let Ok(style) = ProgressStyle::with_template(&template) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn set_position(&self, done: usize, total: usize) {
        let guard = lock(&self.bar);
        if let Some(pb) = guard.as_ref() {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_walk_start(&self, root: &str) {
        self.set_bar(Self::spinner(format!("Walking {}...", root)));
    }

    fn on_walk_progress(&self, entries_found: usize, _current_path: &str) {
        let guard = lock(&self.bar);
        if let Some(pb) = guard.as_ref() {
            pb.set_message(format!("Walking... {} entries found", entries_found));
        }
    }

    fn on_walk_complete(&self, total_entries: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Walk complete: {} entries in {:.2}s",
            total_entries, duration_secs
        );
    }

    fn on_hash_start(&self, total_files: usize) {
        self.set_bar(Self::bar("Hashing", total_files));
    }

    fn on_hash_progress(&self, files_hashed: usize, total_files: usize) {
        self.set_position(files_hashed, total_files);
    }

    fn on_hash_complete(&self, files_hashed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Hash complete: {} files in {:.2}s",
            files_hashed, duration_secs
        );
    }

    fn on_apply_start(&self, total_actions: usize) {
        self.set_bar(Self::bar("Applying", total_actions));
    }

    fn on_apply_progress(&self, applied: usize, total_actions: usize) {
        self.set_position(applied, total_actions);
    }

    fn on_apply_complete(&self, applied: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Catalog updated: {} changes in {:.2}s",
            applied, duration_secs
        );
    }
}
