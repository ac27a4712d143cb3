//! Content-addressed catalogs of directory trees, kept in step with the
//! file system by a trickle scheduler.

pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod model;
pub mod platform;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod tracker;
pub mod utils;

pub use config::AppConfig;
pub use delta::{ContentTransfer, Delta, DeltaAction, DeltaEngine, LoggingTransfer, MatchRank};
pub use engine::{ReconcileEngine, ReconcileResult};
pub use error::{Error, Result};
pub use model::{Catalog, CatalogEntry, FileAttributes};
pub use progress::{ProgressReporter, SilentReporter};
pub use queue::PriorityQueue;
pub use scheduler::{EngineState, TaskEngine};
pub use service::TrackerService;
pub use storage::{CatalogStore, MemoryStore, SqliteStore, Visibility};
pub use tracker::{FileTracker, TrackerTask};
