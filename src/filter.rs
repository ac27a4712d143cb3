use crate::model::FileAttributes;
use glob::Pattern;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::error;

/// Decides whether a path belongs in a catalog.
pub trait FileFilter: Send + Sync {
    fn is_tracked(&self, path: &Path, attributes: FileAttributes) -> bool;
}

pub type SharedFilter = Arc<dyn FileFilter>;

/// Tracks everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackAll;

impl FileFilter for TrackAll {
    fn is_tracked(&self, _path: &Path, _attributes: FileAttributes) -> bool {
        true
    }
}

/// Attribute mask, extension allow-list and glob ignore patterns.
#[derive(Clone, Default)]
pub struct PathFilter {
    excluded_attributes: FileAttributes,
    extensions: Vec<String>,
    ignore_patterns: Vec<Pattern>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_attributes(mut self, attributes: FileAttributes) -> Self {
        self.excluded_attributes = attributes;
        self
    }

    /// Only files with one of these extensions are tracked; an empty list
    /// allows all. Directories are never filtered by extension.
    pub fn allow_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self
    }

    pub fn ignore<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignore_patterns = globs
            .into_iter()
            .filter_map(|glob| match Pattern::new(glob.as_ref()) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob.as_ref(), e);
                    None
                }
            })
            .collect();
        self
    }
}

impl FileFilter for PathFilter {
    fn is_tracked(&self, path: &Path, attributes: FileAttributes) -> bool {
        if attributes.intersects(self.excluded_attributes) {
            return false;
        }

        if self
            .ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
        {
            return false;
        }

        if attributes.is_directory() || self.extensions.is_empty() {
            return true;
        }

        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| self.extensions.iter().any(|allowed| *allowed == ext))
            .unwrap_or(false)
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.ignore_patterns.iter().map(|p| p.as_str()).collect();
        f.debug_struct("PathFilter")
            .field("excluded_attributes", &self.excluded_attributes)
            .field("extensions", &self.extensions)
            .field("ignore_patterns", &patterns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_mask() {
        let filter = PathFilter::new().exclude_attributes(FileAttributes::HIDDEN | FileAttributes::SYSTEM);
        assert!(filter.is_tracked(Path::new("/r/a.txt"), FileAttributes::ARCHIVE));
        assert!(!filter.is_tracked(Path::new("/r/.a"), FileAttributes::HIDDEN));
        assert!(!filter.is_tracked(
            Path::new("/r/sys"),
            FileAttributes::SYSTEM | FileAttributes::DIRECTORY
        ));
    }

    #[test]
    fn test_extension_allow_list_skips_directories() {
        let filter = PathFilter::new().allow_extensions([".JPG", "png"]);
        assert!(filter.is_tracked(Path::new("/r/photo.jpg"), FileAttributes::NONE));
        assert!(filter.is_tracked(Path::new("/r/shot.PNG"), FileAttributes::NONE));
        assert!(!filter.is_tracked(Path::new("/r/notes.txt"), FileAttributes::NONE));
        assert!(!filter.is_tracked(Path::new("/r/README"), FileAttributes::NONE));
        assert!(filter.is_tracked(Path::new("/r/albums"), FileAttributes::DIRECTORY));
    }

    #[test]
    fn test_ignore_globs() {
        let filter = PathFilter::new().ignore(["**/.git/**", "**/*.tmp", "[invalid"]);
        assert!(!filter.is_tracked(Path::new("/r/.git/HEAD"), FileAttributes::NONE));
        assert!(!filter.is_tracked(Path::new("/r/x/file.tmp"), FileAttributes::NONE));
        assert!(filter.is_tracked(Path::new("/r/x/file.txt"), FileAttributes::NONE));
    }
}
