use crate::scanner::FileStat;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct CachedSignature {
    length: u64,
    modified: DateTime<Utc>,
    signature: String,
}

/// Signatures keyed by path, valid while length and full-precision modified
/// time are unchanged.
#[derive(Debug, Default)]
pub struct SignatureCache {
    entries: DashMap<PathBuf, CachedSignature>,
}

impl SignatureCache {
    pub fn get(&self, path: &Path, stat: &FileStat) -> Option<String> {
        let cached = self.entries.get(path)?;
        if cached.length == stat.length && cached.modified == stat.modified {
            Some(cached.signature.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, path: &Path, stat: &FileStat, signature: &str) {
        self.entries.insert(
            path.to_path_buf(),
            CachedSignature {
                length: stat.length,
                modified: stat.modified,
                signature: signature.to_string(),
            },
        );
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn invalidate_tree(&self, path: &Path) {
        self.entries.retain(|cached, _| !cached.starts_with(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
