//! Live tracking: file system notifications become prioritized, retryable
//! tasks that a trickle [`TaskEngine`](crate::scheduler::TaskEngine) applies
//! to the catalog one at a time.

pub mod events;
pub mod file_tracker;
pub mod task;
pub mod work_queue;

pub use file_tracker::{FileTracker, StartReport, TrackerOptions};
pub use task::{priority, ChangeType, TaskSource, TrackerTask, MAX_RETRY};
pub use work_queue::{DuplicatePolicy, TrackerWorkQueue};
