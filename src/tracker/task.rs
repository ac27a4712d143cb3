use std::fmt;
use std::path::{Path, PathBuf};

/// Attempts after the first before a failing task is dropped.
pub const MAX_RETRY: u32 = 3;

const SOURCE_WEIGHT: f64 = 0.35;
const CHANGE_WEIGHT: f64 = 0.25;
const RETRY_WEIGHT: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Changed,
    Deleted,
    Renamed,
}

impl ChangeType {
    fn score(self) -> f64 {
        match self {
            ChangeType::Deleted => 1.00,
            ChangeType::Renamed => 0.75,
            ChangeType::Created => 0.50,
            ChangeType::Changed => 0.25,
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskSource {
    /// A live file system notification.
    FileTracker,
    /// The startup sweep for catalog entries missing on disk.
    ExtrasScan,
    /// The startup sweep for paths that differ from the catalog.
    ChangesScan,
}

impl TaskSource {
    fn score(self) -> f64 {
        match self {
            TaskSource::FileTracker => 1.00,
            TaskSource::ExtrasScan => 0.67,
            TaskSource::ChangesScan => 0.33,
        }
    }
}

/// Weighted priority in `[0, 1]`; higher runs first.
pub fn priority(source: TaskSource, change_type: ChangeType, retry_count: u32) -> f64 {
    let retries = retry_count.min(MAX_RETRY);
    let retry_score = f64::from(MAX_RETRY - retries) / f64::from(MAX_RETRY);
    SOURCE_WEIGHT * source.score() + CHANGE_WEIGHT * change_type.score() + RETRY_WEIGHT * retry_score
}

/// One unit of tracking work. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerTask {
    pub change_type: ChangeType,
    pub full_path: PathBuf,
    /// The source of a rename.
    pub old_full_path: Option<PathBuf>,
    pub retry_count: u32,
    pub source: TaskSource,
}

impl TrackerTask {
    pub fn new(change_type: ChangeType, full_path: impl Into<PathBuf>, source: TaskSource) -> Self {
        Self {
            change_type,
            full_path: full_path.into(),
            old_full_path: None,
            retry_count: 0,
            source,
        }
    }

    pub fn created(full_path: impl Into<PathBuf>, source: TaskSource) -> Self {
        Self::new(ChangeType::Created, full_path, source)
    }

    pub fn changed(full_path: impl Into<PathBuf>, source: TaskSource) -> Self {
        Self::new(ChangeType::Changed, full_path, source)
    }

    pub fn deleted(full_path: impl Into<PathBuf>, source: TaskSource) -> Self {
        Self::new(ChangeType::Deleted, full_path, source)
    }

    pub fn renamed(
        old_full_path: impl Into<PathBuf>,
        full_path: impl Into<PathBuf>,
        source: TaskSource,
    ) -> Self {
        Self {
            old_full_path: Some(old_full_path.into()),
            ..Self::new(ChangeType::Renamed, full_path, source)
        }
    }

    pub fn priority(&self) -> f64 {
        priority(self.source, self.change_type, self.retry_count)
    }

    /// Same work, one more attempt on the clock.
    pub fn retried(mut self) -> Self {
        self.retry_count += 1;
        self
    }

    /// Rewrites this task as a different change against `path`, keeping
    /// source and retry count.
    pub fn rewrite(mut self, change_type: ChangeType, path: &Path) -> Self {
        self.change_type = change_type;
        self.full_path = path.to_path_buf();
        self.old_full_path = None;
        self
    }

    /// Case-folded identity used for duplicate detection.
    pub fn path_key(&self) -> String {
        self.full_path.to_string_lossy().to_ascii_lowercase()
    }

    /// Case-folded identity of a rename's source.
    pub fn old_path_key(&self) -> Option<String> {
        self.old_full_path
            .as_deref()
            .map(|old| old.to_string_lossy().to_ascii_lowercase())
    }

    pub fn is_higher_priority(a: &TrackerTask, b: &TrackerTask) -> bool {
        a.priority() > b.priority()
    }
}

impl fmt::Display for TrackerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_full_path {
            Some(old) => write!(
                f,
                "{:?} {} -> {} (retry {})",
                self.change_type,
                old.display(),
                self.full_path.display(),
                self.retry_count
            ),
            None => write!(
                f,
                "{:?} {} (retry {})",
                self.change_type,
                self.full_path.display(),
                self.retry_count
            ),
        }
    }
}
