use super::sqlite::SqliteStore;
use super::{CatalogStore, Visibility};
use crate::error::{Error, Result};
use crate::model::{min_date, Catalog, CatalogEntry, FileAttributes};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};

const ENTRY_COLUMNS: &str =
    "id, catalog_id, parent, name, attributes, created, modified, length, signature, deleted";

fn to_date(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(min_date)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    Ok(CatalogEntry {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        parent: row.get(2)?,
        name: row.get(3)?,
        attributes: FileAttributes::from_bits(row.get::<_, u32>(4)?),
        created: to_date(row.get(5)?),
        modified: to_date(row.get(6)?),
        length: row.get::<_, i64>(7)?.max(0) as u64,
        signature: row.get(8)?,
        deleted: row.get::<_, Option<i64>>(9)?.map(to_date),
    })
}

fn catalog_from_row(row: &Row<'_>) -> rusqlite::Result<Catalog> {
    Ok(Catalog {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        is_indexed: row.get(3)?,
    })
}

fn deleted_clause(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Live => " AND deleted IS NULL",
        Visibility::IncludeDeleted => "",
    }
}

/// The live-path unique index surfaces as a constraint failure; callers see
/// it as a bad argument like every other store does.
fn map_constraint(err: rusqlite::Error, entry: &CatalogEntry) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Error::invalid(format!(
                "a live entry already exists at {}{}",
                entry.parent, entry.name
            ))
        }
        other => other.into(),
    }
}

impl SqliteStore {
    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.connection().prepare_cached(sql)?;
        let entries = stmt
            .query_map(params, entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl CatalogStore for SqliteStore {
    // ── Catalogs ─────────────────────────────────────────────────

    fn insert_catalog(&mut self, catalog: &Catalog) -> Result<i64> {
        self.begin_write()?;
        self.connection().execute(
            "INSERT INTO catalog (name, path, is_indexed) VALUES (?1, ?2, ?3)",
            params![catalog.name, catalog.path, catalog.is_indexed],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    fn update_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        self.begin_write()?;
        let changed = self.connection().execute(
            "UPDATE catalog SET name = ?1, path = ?2, is_indexed = ?3 WHERE id = ?4",
            params![catalog.name, catalog.path, catalog.is_indexed, catalog.id],
        )?;
        if changed == 0 {
            return Err(Error::CatalogNotFound(catalog.id));
        }
        Ok(())
    }

    fn catalog(&self, id: i64) -> Result<Option<Catalog>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT id, name, path, is_indexed FROM catalog WHERE id = ?1",
                params![id],
                catalog_from_row,
            )
            .optional()?)
    }

    fn catalog_by_path(&self, path: &str) -> Result<Option<Catalog>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT id, name, path, is_indexed FROM catalog WHERE path = ?1 COLLATE NOCASE",
                params![path],
                catalog_from_row,
            )
            .optional()?)
    }

    fn catalogs(&self) -> Result<Vec<Catalog>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, name, path, is_indexed FROM catalog ORDER BY id")?;
        let catalogs = stmt
            .query_map([], catalog_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(catalogs)
    }

    // ── Entries ──────────────────────────────────────────────────

    fn insert_entry(&mut self, entry: &CatalogEntry) -> Result<i64> {
        if self.catalog(entry.catalog_id)?.is_none() {
            return Err(Error::CatalogNotFound(entry.catalog_id));
        }
        self.begin_write()?;
        self.connection()
            .execute(
                "INSERT INTO catalog_entry \
                 (catalog_id, parent, name, attributes, created, modified, length, signature, deleted) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.catalog_id,
                    entry.parent,
                    entry.name,
                    entry.attributes.bits(),
                    entry.created.timestamp(),
                    entry.modified.timestamp(),
                    entry.length as i64,
                    entry.signature,
                    entry.deleted.map(|d| d.timestamp()),
                ],
            )
            .map_err(|e| map_constraint(e, entry))?;
        Ok(self.connection().last_insert_rowid())
    }

    fn update_entry(&mut self, entry: &CatalogEntry) -> Result<()> {
        self.begin_write()?;
        let changed = self
            .connection()
            .execute(
                "UPDATE catalog_entry SET catalog_id = ?1, parent = ?2, name = ?3, attributes = ?4, \
                 created = ?5, modified = ?6, length = ?7, signature = ?8, deleted = ?9 \
                 WHERE id = ?10",
                params![
                    entry.catalog_id,
                    entry.parent,
                    entry.name,
                    entry.attributes.bits(),
                    entry.created.timestamp(),
                    entry.modified.timestamp(),
                    entry.length as i64,
                    entry.signature,
                    entry.deleted.map(|d| d.timestamp()),
                    entry.id,
                ],
            )
            .map_err(|e| map_constraint(e, entry))?;
        if changed == 0 {
            return Err(Error::invalid(format!("entry {} does not exist", entry.id)));
        }
        Ok(())
    }

    fn entry(&self, id: i64) -> Result<Option<CatalogEntry>> {
        Ok(self
            .connection()
            .query_row(
                &format!("SELECT {} FROM catalog_entry WHERE id = ?1", ENTRY_COLUMNS),
                params![id],
                entry_from_row,
            )
            .optional()?)
    }

    fn entries_at_path(
        &self,
        catalog_id: i64,
        parent: &str,
        name: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM catalog_entry \
                 WHERE catalog_id = ?1 AND parent = ?2 AND name = ?3{}",
                ENTRY_COLUMNS,
                deleted_clause(visibility)
            ),
            params![catalog_id, parent, name],
        )
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
        self.query_entries(
            &format!(
                "SELECT {} FROM catalog_entry WHERE catalog_id = ?1 AND signature = ?2{}",
                ENTRY_COLUMNS,
                deleted_clause(visibility)
            ),
            params![catalog_id, signature],
        )
    }

    fn entries_under(
        &self,
        catalog_id: i64,
        parent_prefix: &str,
        visibility: Visibility,
    ) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM catalog_entry \
                 WHERE catalog_id = ?1 AND substr(parent, 1, length(?2)) = ?2 COLLATE NOCASE{} \
                 ORDER BY parent, name",
                ENTRY_COLUMNS,
                deleted_clause(visibility)
            ),
            params![catalog_id, parent_prefix],
        )
    }

    fn entries(&self, catalog_id: i64, visibility: Visibility) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM catalog_entry WHERE catalog_id = ?1{} ORDER BY parent, name",
                ENTRY_COLUMNS,
                deleted_clause(visibility)
            ),
            params![catalog_id],
        )
    }

    fn count_entries(&self, catalog_id: i64, visibility: Visibility) -> Result<usize> {
        let count: i64 = self.connection().query_row(
            &format!(
                "SELECT COUNT(*) FROM catalog_entry WHERE catalog_id = ?1{}",
                deleted_clause(visibility)
            ),
            params![catalog_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn save(&mut self) -> Result<()> {
        self.commit()
    }
}
