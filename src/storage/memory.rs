use super::{CatalogStore, Visibility};
use crate::error::{Error, Result};
use crate::model::{eq_ignore_case, path_key, starts_with_ignore_case, Catalog, CatalogEntry};
use std::collections::BTreeMap;

/// Process-local store. Writes apply immediately; `save` only counts commits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalogs: BTreeMap<i64, Catalog>,
    entries: BTreeMap<i64, CatalogEntry>,
    next_catalog_id: i64,
    next_entry_id: i64,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    fn check_live_path_free(&self, entry: &CatalogEntry) -> Result<()> {
        if entry.is_deleted() {
            return Ok(());
        }
        let key = entry.path_key();
        let taken = self.entries.values().any(|other| {
            other.id != entry.id
                && other.catalog_id == entry.catalog_id
                && !other.is_deleted()
                && other.path_key() == key
        });
        if taken {
            return Err(Error::invalid(format!(
                "a live entry already exists at {}{}",
                entry.parent, entry.name
            )));
        }
        Ok(())
    }

    fn select<P>(&self, catalog_id: i64, visibility: Visibility, predicate: P) -> Vec<CatalogEntry>
    where
        P: Fn(&CatalogEntry) -> bool,
    {
        self.entries
            .values()
            .filter(|e| e.catalog_id == catalog_id && visibility.admits(e) && predicate(e))
            .cloned()
            .collect()
    }
}

impl CatalogStore for MemoryStore {
    fn insert_catalog(&mut self, catalog: &Catalog) -> Result<i64> {
        if self.catalogs.values().any(|c| eq_ignore_case(&c.path, &catalog.path)) {
            return Err(Error::invalid(format!("catalog already registered at {}", catalog.path)));
        }
        self.next_catalog_id += 1;
        let mut stored = catalog.clone();
        stored.id = self.next_catalog_id;
        self.catalogs.insert(stored.id, stored);
        Ok(self.next_catalog_id)
    }

    fn update_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        match self.catalogs.get_mut(&catalog.id) {
            Some(stored) => {
                *stored = catalog.clone();
                Ok(())
            }
            None => Err(Error::CatalogNotFound(catalog.id)),
        }
    }

    fn catalog(&self, id: i64) -> Result<Option<Catalog>> {
        Ok(self.catalogs.get(&id).cloned())
    }

    fn catalog_by_path(&self, path: &str) -> Result<Option<Catalog>> {
        Ok(self
            .catalogs
            .values()
            .find(|c| eq_ignore_case(&c.path, path))
            .cloned())
    }

    fn catalogs(&self) -> Result<Vec<Catalog>> {
        Ok(self.catalogs.values().cloned().collect())
    }

    fn insert_entry(&mut self, entry: &CatalogEntry) -> Result<i64> {
        if !self.catalogs.contains_key(&entry.catalog_id) {
            return Err(Error::CatalogNotFound(entry.catalog_id));
        }
        let mut stored = entry.clone();
        stored.id = -1;
        self.check_live_path_free(&stored)?;
        self.next_entry_id += 1;
        stored.id = self.next_entry_id;
        self.entries.insert(stored.id, stored);
        Ok(self.next_entry_id)
    }

    fn update_entry(&mut self, entry: &CatalogEntry) -> Result<()> {
        if !self.entries.contains_key(&entry.id) {
            return Err(Error::invalid(format!("entry {} does not exist", entry.id)));
        }
        self.check_live_path_free(entry)?;
        self.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    fn entry(&self, id: i64) -> Result<Option<CatalogEntry>> {
        Ok(self.entries.get(&id).cloned())
    }

    fn entries_at_path(
        &self,
        catalog_id: i64,
        parent: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>> {
        let key = path_key(parent, name);
        Ok(self.select(catalog_id, visibility, |e| e.path_key() == key))
    }

    fn entries_with_signature(
        &self,
        catalog_id: i64,
        signature: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>> {
        if signature.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.select(catalog_id, visibility, |e| e.signature == signature))
    }

    fn entries_under(
        &self,
        catalog_id: i64,
        parent_prefix: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>> {
        Ok(self.select(catalog_id, visibility, |e| {
            starts_with_ignore_case(&e.parent, parent_prefix)
        }))
    }

    fn entries(&self, catalog_id: i64, visibility: Visibility) -> Result<Vec<CatalogEntry>> {
        Ok(self.select(catalog_id, visibility, |_| true))
    }

    fn count_entries(&self, catalog_id: i64, visibility: Visibility) -> Result<usize> {
        Ok(self
            .entries
            .values()
            .filter(|e| e.catalog_id == catalog_id && visibility.admits(e))
            .count())
    }

    fn save(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}
