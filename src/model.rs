//! Catalog entities and the normalisation rules every comparison relies on.
//!
//! Entry paths are catalog-relative, forward-slash separated and rooted at
//! `/`: an entry's `parent` always ends with `/` (`"/"` for the catalog root)
//! and a directory's full path carries a trailing `/`. Paths keep their case
//! but compare case-insensitively.

use crate::error::{Error, Result};
use crate::scanner::FileStat;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// 1753-01-01T00:00:00Z, the smallest date the relational backends keep.
const MIN_DATE_SECS: i64 = -6_847_804_800;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const NONE: FileAttributes = FileAttributes(0);
    pub const READ_ONLY: FileAttributes = FileAttributes(0x0001);
    pub const HIDDEN: FileAttributes = FileAttributes(0x0002);
    pub const SYSTEM: FileAttributes = FileAttributes(0x0004);
    pub const DIRECTORY: FileAttributes = FileAttributes(0x0010);
    pub const ARCHIVE: FileAttributes = FileAttributes(0x0020);
    pub const TEMPORARY: FileAttributes = FileAttributes(0x0100);

    /// The only bits a catalog entry keeps.
    pub const TRACKED: FileAttributes =
        FileAttributes(Self::READ_ONLY.0 | Self::ARCHIVE.0 | Self::DIRECTORY.0);

    pub const fn from_bits(bits: u32) -> Self {
        FileAttributes(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: FileAttributes) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: FileAttributes) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn scrub(self) -> Self {
        FileAttributes(self.0 & Self::TRACKED.0)
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    /// Parses a configuration name such as `hidden` or `read-only`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-only" | "readonly" => Some(Self::READ_ONLY),
            "hidden" => Some(Self::HIDDEN),
            "system" => Some(Self::SYSTEM),
            "directory" => Some(Self::DIRECTORY),
            "archive" => Some(Self::ARCHIVE),
            "temporary" => Some(Self::TEMPORARY),
            _ => None,
        }
    }
}

impl BitOr for FileAttributes {
    type Output = FileAttributes;

    fn bitor(self, rhs: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileAttributes {
    fn bitor_assign(&mut self, rhs: FileAttributes) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FileAttributes {
    type Output = FileAttributes;

    fn bitand(self, rhs: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 & rhs.0)
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FileAttributes, &str); 6] = [
            (FileAttributes::READ_ONLY, "READ_ONLY"),
            (FileAttributes::HIDDEN, "HIDDEN"),
            (FileAttributes::SYSTEM, "SYSTEM"),
            (FileAttributes::DIRECTORY, "DIRECTORY"),
            (FileAttributes::ARCHIVE, "ARCHIVE"),
            (FileAttributes::TEMPORARY, "TEMPORARY"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}

/// One watched tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub id: i64,
    pub name: String,
    /// Root directory, always ending with the platform separator.
    pub path: String,
    pub is_indexed: bool,
}

impl Catalog {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            path: normalize_root(path),
            is_indexed: false,
        }
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Catalog-relative path of an absolute path under this root.
    pub fn relative_path(&self, absolute: &Path) -> Result<String> {
        normalize_path(self.root(), absolute)
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        to_absolute(self.root(), relative)
    }
}

/// A file or directory within a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub catalog_id: i64,
    pub parent: String,
    pub name: String,
    pub attributes: FileAttributes,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub length: u64,
    pub signature: String,
    pub deleted: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn new(catalog_id: i64, relative_path: &str, attributes: FileAttributes) -> Self {
        let (parent, name) = split_path(relative_path);
        Self {
            id: 0,
            catalog_id,
            parent,
            name,
            attributes: attributes.scrub(),
            created: min_date(),
            modified: min_date(),
            length: 0,
            signature: String::new(),
            deleted: None,
        }
    }

    /// Builds a candidate from observed metadata. Directory length and
    /// signature are forced empty.
    pub fn from_stat(
        catalog_id: i64,
        relative_path: &str,
        stat: &FileStat,
        signature: Option<String>,
    ) -> Self {
        let mut entry = Self::new(catalog_id, relative_path, stat.attributes);
        entry.created = normalize_date(stat.created);
        entry.modified = normalize_date(stat.modified);
        if !entry.is_dir() {
            entry.length = stat.length;
            entry.signature = signature.unwrap_or_default();
        }
        entry
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Full catalog-relative path; directories end with `/`.
    pub fn path(&self) -> String {
        if self.is_dir() {
            format!("{}{}/", self.parent, self.name)
        } else {
            format!("{}{}", self.parent, self.name)
        }
    }

    /// Case-folded `parent + name`, the identity used for path matching.
    pub fn path_key(&self) -> String {
        path_key(&self.parent, &self.name)
    }

    /// The `parent` value of this entry's immediate children.
    pub fn child_parent(&self) -> String {
        format!("{}{}/", self.parent, self.name)
    }

    pub fn is_at(&self, parent: &str, name: &str) -> bool {
        self.path_key() == path_key(parent, name)
    }

    /// Change-detection equality: identifiers and deletion state are ignored.
    pub fn value_eq(&self, other: &CatalogEntry) -> bool {
        self.path_key() == other.path_key()
            && self.attributes == other.attributes
            && self.length == other.length
            && normalize_date(self.created) == normalize_date(other.created)
            && normalize_date(self.modified) == normalize_date(other.modified)
            && self.signature == other.signature
    }

    /// Copies every mutable field from `other`, keeping this entry's ids and
    /// deletion state.
    pub fn copy_values_from(&mut self, other: &CatalogEntry) {
        self.parent = other.parent.clone();
        self.name = other.name.clone();
        self.attributes = other.attributes;
        self.created = other.created;
        self.modified = other.modified;
        self.length = other.length;
        self.signature = other.signature.clone();
    }
}

pub fn min_date() -> DateTime<Utc> {
    Utc.timestamp_opt(MIN_DATE_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Truncates to whole seconds and floors at [`min_date`].
pub fn normalize_date(date: DateTime<Utc>) -> DateTime<Utc> {
    let secs = date.timestamp().max(MIN_DATE_SECS);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(min_date)
}

// Paths fold case over ASCII only, the same rule as SQLite's NOCASE
// collation. Folding never changes a path's byte length.

pub fn path_key(parent: &str, name: &str) -> String {
    format!("{}{}", parent, name).to_ascii_lowercase()
}

pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

pub fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// Splits a catalog-relative path into `(parent, name)`.
pub fn split_path(relative: &str) -> (String, String) {
    let trimmed = relative.trim_end_matches('/');
    let rooted = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    match rooted.rsplit_once('/') {
        Some((parent, name)) => (format!("{}/", parent), name.to_string()),
        None => ("/".to_string(), rooted),
    }
}

/// Rewrites an absolute path as a catalog-relative path rooted at `/`.
pub fn normalize_path(root: &Path, absolute: &Path) -> Result<String> {
    let relative = absolute.strip_prefix(root).map_err(|_| {
        Error::invalid(format!(
            "{} is not under {}",
            absolute.display(),
            root.display()
        ))
    })?;

    let mut out = String::from("/");
    let mut first = true;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                if !first {
                    out.push('/');
                }
                out.push_str(&part.to_string_lossy().replace('\\', "/"));
                first = false;
            }
            Component::CurDir => {}
            _ => {
                return Err(Error::invalid(format!(
                    "unsupported path component in {}",
                    absolute.display()
                )))
            }
        }
    }
    Ok(out)
}

pub fn to_absolute(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in relative.split('/').filter(|part| !part.is_empty()) {
        path.push(part);
    }
    path
}

fn normalize_root(path: &str) -> String {
    let mut root = path.to_string();
    if !root.ends_with(MAIN_SEPARATOR) && !root.ends_with('/') {
        root.push(MAIN_SEPARATOR);
    }
    root
}
