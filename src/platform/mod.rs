#[cfg(target_os = "windows")]
pub mod windows;

use crate::model::FileAttributes;
use std::fs::Metadata;
use std::path::Path;

#[cfg(target_os = "windows")]
pub fn file_attributes(path: &Path, metadata: &Metadata) -> FileAttributes {
    windows::file_attributes(path, metadata)
}

/// Unix has no attribute word; derive the bits the catalog cares about from
/// permissions and dot-file naming.
#[cfg(not(target_os = "windows"))]
pub fn file_attributes(path: &Path, metadata: &Metadata) -> FileAttributes {
    let mut attributes = FileAttributes::NONE;
    if metadata.is_dir() {
        attributes |= FileAttributes::DIRECTORY;
    }
    if metadata.permissions().readonly() {
        attributes |= FileAttributes::READ_ONLY;
    }
    let hidden = path
        .file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false);
    if hidden {
        attributes |= FileAttributes::HIDDEN;
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_directory_bit_is_reported() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("sub");
        fs::create_dir(&dir).unwrap();
        let metadata = fs::metadata(&dir).unwrap();
        assert!(file_attributes(&dir, &metadata).contains(FileAttributes::DIRECTORY));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_dot_files_are_hidden() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join(".secret");
        fs::write(&file, "x").unwrap();
        let metadata = fs::metadata(&file).unwrap();
        let attributes = file_attributes(&file, &metadata);
        assert!(attributes.contains(FileAttributes::HIDDEN));
        assert!(!attributes.contains(FileAttributes::DIRECTORY));
    }
}
