//! Content signatures.
//!
//! A signature is the lowercase hex blake3 digest of a file's full byte
//! stream. Hashing dominates the cost of cataloging, so [`ContentHasher`]
//! remembers signatures by (path, length, modified time) and never hashes the
//! same file concurrently with itself. Different files may hash in parallel.

pub mod cache;

use crate::scanner::{FileStat, FileSystem};
use cache::SignatureCache;
use dashmap::DashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[derive(Debug, Default)]
pub struct ContentHasher {
    in_flight: DashMap<PathBuf, Arc<Mutex<()>>>,
    cache: SignatureCache,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature for `path`, served from cache when `stat` still matches
    /// what was hashed last time.
    pub fn signature(&self, fs: &dyn FileSystem, path: &Path, stat: &FileStat) -> io::Result<String> {
        if let Some(signature) = self.cache.get(path, stat) {
            trace!("Found signature for {} in cache", path.display());
            return Ok(signature);
        }
        let signature = self.hash_file(fs, path)?;
        self.cache.insert(path, stat, &signature);
        Ok(signature)
    }

    /// Hashes the file unconditionally, serialised per path.
    pub fn hash_file(&self, fs: &dyn FileSystem, path: &Path) -> io::Result<String> {
        let slot = self
            .in_flight
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            fs.open(path).and_then(hash_reader)
        };

        drop(slot);
        self.in_flight
            .remove_if(path, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }

    /// Drops cached signatures at or below `path`.
    pub fn invalidate_tree(&self, path: &Path) {
        self.cache.invalidate_tree(path);
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::LocalFileSystem;
    use rayon::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_signature_is_lowercase_hex() {
        let sig = hash_bytes(b"hello world");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash_reader(&b"hello world"[..]).unwrap(), sig);
    }

    #[test]
    fn test_identical_content_identical_signature() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        fs::write(&a, "same bytes").unwrap();
        fs::write(&b, "same bytes").unwrap();
        let hasher = ContentHasher::new();
        let fs_provider = LocalFileSystem;
        assert_eq!(
            hasher.hash_file(&fs_provider, &a).unwrap(),
            hasher.hash_file(&fs_provider, &b).unwrap()
        );
    }

    #[test]
    fn test_signature_cache_tracks_metadata() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("f.txt");
        fs::write(&file, "v1").unwrap();
        let fs_provider = LocalFileSystem;
        let hasher = ContentHasher::new();

        let stat = fs_provider.stat(&file).unwrap();
        let first = hasher.signature(&fs_provider, &file, &stat).unwrap();
        assert_eq!(hasher.cached_count(), 1);

        let mut changed = stat.clone();
        changed.length += 1;
        fs::write(&file, "v22").unwrap();
        let second = hasher.signature(&fs_provider, &file, &changed).unwrap();
        assert_ne!(first, second);

        hasher.invalidate(&file);
        assert_eq!(hasher.cached_count(), 0);
    }

    #[test]
    fn test_concurrent_hashing_of_one_file() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("big.bin");
        fs::write(&file, vec![7u8; 256 * 1024]).unwrap();
        let hasher = ContentHasher::new();
        let fs_provider = LocalFileSystem;

        let sigs: Vec<String> = (0..8)
            .into_par_iter()
            .map(|_| hasher.hash_file(&fs_provider, &file).unwrap())
            .collect();
        assert!(sigs.windows(2).all(|w| w[0] == w[1]));
        assert!(hasher.in_flight.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = tempdir().unwrap();
        let hasher = ContentHasher::new();
        let err = hasher
            .hash_file(&LocalFileSystem, &tmp.path().join("nope"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
