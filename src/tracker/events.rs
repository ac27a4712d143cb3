//! Maps `notify` events onto tracker tasks.

use super::task::{TaskSource, TrackerTask};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use std::fs;
use std::path::PathBuf;

pub fn map_event(event: Event) -> Vec<TrackerTask> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => each(paths, |p, s| TrackerTask::created(p, s)),
        EventKind::Remove(_) => each(paths, |p, s| TrackerTask::deleted(p, s)),
        EventKind::Modify(ModifyKind::Name(mode)) => map_rename(paths, mode),
        EventKind::Modify(_) => each(paths, |p, s| TrackerTask::changed(p, s)),
        _ => Vec::new(),
    }
}

fn map_rename(paths: Vec<PathBuf>, mode: RenameMode) -> Vec<TrackerTask> {
    match mode {
        RenameMode::Both if paths.len() >= 2 => {
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => {
                    vec![TrackerTask::renamed(from, to, TaskSource::FileTracker)]
                }
                _ => Vec::new(),
            }
        }
        RenameMode::Both => each(paths, exists_or_gone),
        RenameMode::From => each(paths, |p, s| TrackerTask::deleted(p, s)),
        RenameMode::To => each(paths, |p, s| TrackerTask::created(p, s)),
        RenameMode::Any | RenameMode::Other => each(paths, exists_or_gone),
    }
}

/// Half of a rename whose other side we never saw.
fn exists_or_gone(path: PathBuf, source: TaskSource) -> TrackerTask {
    if fs::symlink_metadata(&path).is_ok() {
        TrackerTask::created(path, source)
    } else {
        TrackerTask::deleted(path, source)
    }
}

fn each(paths: Vec<PathBuf>, build: fn(PathBuf, TaskSource) -> TrackerTask) -> Vec<TrackerTask> {
    paths
        .into_iter()
        .map(|path| build(path, TaskSource::FileTracker))
        .collect()
}
