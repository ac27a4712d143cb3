pub mod walk;

use crate::model::FileAttributes;
use crate::platform;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use walk::{snapshot_tree, TreeSnapshot};

/// Metadata observed for one path. `attributes` carries the raw OS bits;
/// catalog entries scrub them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub attributes: FileAttributes,
    pub length: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn from_metadata(path: &Path, metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified()?;
        let created = metadata.created().unwrap_or(modified);
        Ok(Self {
            attributes: platform::file_attributes(path, metadata),
            length: if metadata.is_dir() { 0 } else { metadata.len() },
            created: DateTime::<Utc>::from(created),
            modified: DateTime::<Utc>::from(modified),
        })
    }
}

/// A failure during a walk, with the path it happened at when known.
#[derive(Debug)]
pub struct WalkError {
    pub path: Option<PathBuf>,
    pub source: io::Error,
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.source),
            None => write!(f, "{}", self.source),
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl WalkError {
    pub fn at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: Some(path.into()),
            source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Permission and vanished-path failures; the walk goes on without them.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
        )
    }
}

impl From<walkdir::Error> for WalkError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf);
        Self {
            path,
            source: io::Error::from(err),
        }
    }
}

pub type WalkIter<'a> = Box<dyn Iterator<Item = Result<(PathBuf, FileStat), WalkError>> + Send + 'a>;

/// File system provider consumed by the trackers and the reconcile pipeline.
pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// False only when nothing is at `path`. A path that exists but cannot
    /// be read still counts.
    fn exists(&self, path: &Path) -> bool {
        match self.stat(path) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::NotFound,
        }
    }

    /// Immediate children of a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Recursive enumeration below `root`, excluding `root` itself and
    /// symbolic links. Parents are yielded before their children. A
    /// directory that cannot be listed yields an error carrying its path.
    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// The local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        FileStat::from_metadata(path, &metadata)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            children.push(entry.path());
        }
        children.sort();
        Ok(children)
    }

    fn walk<'a>(&'a self, root: &'a Path) -> WalkIter<'a> {
        let iter = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.path_is_symlink() => None,
                Ok(entry) => Some(stat_entry(entry)),
                Err(err) => Some(Err(WalkError::from(err))),
            });
        Box::new(iter)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

fn stat_entry(entry: walkdir::DirEntry) -> Result<(PathBuf, FileStat), WalkError> {
    let stat = entry
        .metadata()
        .map_err(io::Error::from)
        .and_then(|metadata| FileStat::from_metadata(entry.path(), &metadata))
        .map_err(|source| WalkError::at(entry.path(), source))?;
    Ok((entry.into_path(), stat))
}
