//! Catalog persistence.
//!
//! [`CatalogStore`] is the only view the tracking core has of storage.
//! Soft-deleted entries stay in the store; every entry query takes a
//! [`Visibility`] deciding whether they are returned.

pub mod memory;
mod queries;
pub mod sqlite;

use crate::error::Result;
use crate::model::{Catalog, CatalogEntry};
use std::sync::{Arc, Mutex, MutexGuard};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Entries without a deleted date.
    Live,
    /// Live and soft-deleted entries.
    IncludeDeleted,
}

impl Visibility {
    pub fn admits(self, entry: &CatalogEntry) -> bool {
        matches!(self, Visibility::IncludeDeleted) || !entry.is_deleted()
    }
}

pub trait CatalogStore: Send {
    fn insert_catalog(&mut self, catalog: &Catalog) -> Result<i64>;
    fn update_catalog(&mut self, catalog: &Catalog) -> Result<()>;
    fn catalog(&self, id: i64) -> Result<Option<Catalog>>;
    /// Lookup by root path, case-insensitive.
    fn catalog_by_path(&self, path: &str) -> Result<Option<Catalog>>;
    fn catalogs(&self) -> Result<Vec<Catalog>>;

    fn insert_entry(&mut self, entry: &CatalogEntry) -> Result<i64>;
    /// Overwrites the stored row with the same id.
    fn update_entry(&mut self, entry: &CatalogEntry) -> Result<()>;
    fn entry(&self, id: i64) -> Result<Option<CatalogEntry>>;
    /// Exact `parent + name` lookup, case-insensitive.
    fn entries_at_path(
        &self,
        catalog_id: i64,
        parent: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>>;
    fn entries_with_signature(
        &self,
        catalog_id: i64,
        signature: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>>;
    /// Entries whose `parent` starts with `parent_prefix`, case-insensitive.
    fn entries_under(
        &self,
        catalog_id: i64,
        parent_prefix: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>>;
    fn entries(&self, catalog_id: i64, visibility: Visibility) -> Result<Vec<CatalogEntry>>;
    fn count_entries(&self, catalog_id: i64, visibility: Visibility) -> Result<usize>;

    /// Commits pending changes as one unit.
    fn save(&mut self) -> Result<()>;

    fn live_entry(&self, catalog_id: i64, parent: &str, name: &str) -> Result<Option<CatalogEntry>> {
        Ok(self
            .entries_at_path(catalog_id, parent, name, Visibility::Live)?
            .into_iter()
            .next())
    }
}

pub type SharedStore = Arc<Mutex<dyn CatalogStore>>;

pub fn shared<S: CatalogStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub fn lock(store: &SharedStore) -> MutexGuard<'_, dyn CatalogStore + 'static> {
    crate::utils::lock(&**store)
}

/// Returns the catalog rooted at `path`, registering it first if needed.
pub fn ensure_catalog(store: &mut dyn CatalogStore, name: &str, path: &str) -> Result<Catalog> {
    let mut catalog = Catalog::new(name, path);
    if let Some(existing) = store.catalog_by_path(&catalog.path)? {
        return Ok(existing);
    }
    catalog.id = store.insert_catalog(&catalog)?;
    store.save()?;
    tracing::info!("Registered catalog {} '{}' at {}", catalog.id, catalog.name, catalog.path);
    Ok(catalog)
}
