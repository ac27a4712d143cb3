use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, error};

const SCHEMA_VERSION: i64 = 1;

/// SQLite-backed catalog store.
///
/// Writes open an immediate transaction lazily; [`CatalogStore::save`]
/// commits it. Dropping the store with uncommitted writes rolls them back.
///
/// [`CatalogStore::save`]: super::CatalogStore::save
pub struct SqliteStore {
    conn: Connection,
    in_tx: bool,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = SqliteStore { conn, in_tx: false };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        debug!("Opened catalog database at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn, in_tx: false };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
        Ok(())
    }

    /// Older layouts are dropped and recreated; a catalog can always be
    /// rebuilt from the tree it describes.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < SCHEMA_VERSION {
            debug!(
                "Schema version {} < {}, dropping all tables and recreating",
                version, SCHEMA_VERSION
            );
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS catalog_entry;
                 DROP TABLE IF EXISTS catalog;",
            )?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub(super) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts the pending unit of work if none is open.
    pub(super) fn begin_write(&mut self) -> Result<()> {
        if !self.in_tx {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_tx = true;
        }
        Ok(())
    }

    pub(super) fn commit(&mut self) -> Result<()> {
        if self.in_tx {
            self.conn.execute_batch("COMMIT")?;
            self.in_tx = false;
        }
        Ok(())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.in_tx
    }

    /// Removes every catalog and entry.
    pub fn truncate_all(&mut self) -> Result<()> {
        self.commit()?;
        self.conn.execute_batch(
            "DELETE FROM catalog_entry;
             DELETE FROM catalog;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.in_tx {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                error!("Failed to roll back uncommitted catalog changes: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .field("in_tx", &self.in_tx)
            .finish()
    }
}
