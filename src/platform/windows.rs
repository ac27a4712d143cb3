use crate::model::FileAttributes;
use std::fs::Metadata;
use std::os::windows::fs::MetadataExt;
use std::path::Path;

pub fn file_attributes(_path: &Path, metadata: &Metadata) -> FileAttributes {
    FileAttributes::from_bits(metadata.file_attributes())
}
