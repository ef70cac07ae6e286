use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::cleanup::run_due_passes;
use super::store::SysConfig;
use super::{
    CacheError, CacheResult, CleanRequest, CleanStatus, Content, Driver, Expiry, ItemId, ItemMeta,
    ItemStore, LockGuard,
};

/// How long a connection waits for a database locked by another process.
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL UNIQUE,
        expire INTEGER NOT NULL DEFAULT 0,
        invalidate INTEGER NOT NULL DEFAULT 0,
        content BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS permutations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL REFERENCES items (id) ON DELETE CASCADE,
        identifier TEXT NOT NULL,
        content BLOB NOT NULL,
        UNIQUE (item_id, identifier)
    );
    CREATE INDEX IF NOT EXISTS idx_items_invalidate ON items (invalidate);
    CREATE TABLE IF NOT EXISTS meta (
        name TEXT NOT NULL UNIQUE,
        value TEXT
    );
";

/// Item store backed by a single SQLite database.
///
/// Permutations reference their item with `ON DELETE CASCADE`, so replacing or evicting an item
/// drops its permutations in the same statement. Concurrent writers are serialized by SQLite
/// itself, no lock files are involved.
#[derive(Debug)]
pub struct SqliteItemStore {
    path: PathBuf,
    quota: u64,
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    pub fn open(path: &Path, quota: u64) -> CacheResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_owned(),
            quota,
            conn: Mutex::new(conn),
        })
    }

    fn evict_oldest(&self) -> CacheResult<()> {
        if self.quota == 0 {
            return Ok(());
        }
        let mut evicted = 0;
        while self.size()? > self.quota {
            let deleted = self.conn.lock().execute(
                "DELETE FROM items WHERE id = (SELECT MIN(id) FROM items)",
                [],
            )?;
            if deleted == 0 {
                break;
            }
            evicted += deleted;
        }
        if evicted > 0 {
            tracing::info!(evicted, quota = self.quota, "Evicted items over quota");
        }
        Ok(())
    }
}

/// Opens a connection with foreign keys enforced and a generous busy timeout.
pub(crate) fn open_connection(path: &Path) -> CacheResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

pub(crate) fn sqlite_sysconfig(path: &Path, quota: u64) -> SysConfig {
    let mut config = SysConfig::new();
    config.insert("driver", Driver::Sqlite.to_string());
    config.insert("path", path.display().to_string());
    config.insert("quota", quota.to_string());
    config.insert("sqlite_version", rusqlite::version().to_owned());
    config
}

pub(crate) fn sqlite_depends(conn: &Connection) -> CacheResult<()> {
    // foreign key cascades need 3.6.19, everything we bundle is newer
    if rusqlite::version_number() < 3_006_019 {
        return Err(CacheError::Dependency(format!(
            "sqlite {} does not support foreign keys",
            rusqlite::version()
        )));
    }
    let enforced: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if enforced != 1 {
        return Err(CacheError::Dependency("foreign keys are not enforced".into()));
    }
    Ok(())
}

pub(crate) fn get_meta(conn: &Connection, name: &str) -> CacheResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE name = ?1",
            params![name],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten())
}

pub(crate) fn set_meta(conn: &Connection, name: &str, value: &str) -> CacheResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (name, value) VALUES (?1, ?2)",
        params![name, value],
    )?;
    Ok(())
}

/// Converts a timestamp into SQLite's signed integer.
pub(crate) fn to_sql(timestamp: u64) -> i64 {
    i64::try_from(timestamp).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql(timestamp: i64) -> u64 {
    u64::try_from(timestamp).unwrap_or(0)
}

fn row_id(id: &ItemId) -> CacheResult<i64> {
    id.as_str()
        .parse()
        .map_err(|_| CacheError::InvalidItemId(id.to_string()))
}

fn decode(content: Option<Vec<u8>>) -> CacheResult<Option<Content>> {
    content.as_deref().map(Content::decode).transpose()
}

impl ItemStore for SqliteItemStore {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn depends(&self) -> CacheResult<()> {
        sqlite_depends(&self.conn.lock())
    }

    fn sysconfig(&self) -> SysConfig {
        sqlite_sysconfig(&self.path, self.quota)
    }

    fn size(&self) -> CacheResult<u64> {
        let size: i64 = self.conn.lock().query_row(
            "SELECT
                (SELECT COALESCE(SUM(LENGTH(content)), 0) FROM items) +
                (SELECT COALESCE(SUM(LENGTH(content)), 0) FROM permutations)",
            [],
            |row| row.get(0),
        )?;
        Ok(from_sql(size))
    }

    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus> {
        run_due_passes(
            request,
            |name| self.get_meta(name),
            |name, value| self.set_meta(name, value),
            || {
                let deleted = self.conn.lock().execute(
                    "DELETE FROM items WHERE invalidate != 0 AND invalidate < ?1",
                    params![to_sql(request.now)],
                )?;
                tracing::info!(deleted, "Deleted hard-expired items");
                Ok(())
            },
            || {
                self.evict_oldest()?;
                self.conn.lock().execute_batch("VACUUM;")?;
                Ok(())
            },
        )
    }

    fn get_meta(&self, name: &str) -> CacheResult<Option<String>> {
        get_meta(&self.conn.lock(), name)
    }

    fn set_meta(&self, name: &str, value: &str) -> CacheResult<()> {
        set_meta(&self.conn.lock(), name, value)
    }

    fn get_item_meta(&self, identifier: &str) -> CacheResult<Option<ItemMeta>> {
        let meta = self
            .conn
            .lock()
            .query_row(
                "SELECT id, expire, invalidate FROM items WHERE identifier = ?1",
                params![identifier],
                |row| {
                    Ok(ItemMeta {
                        id: ItemId::new(row.get::<_, i64>(0)?.to_string()),
                        expiry: Expiry {
                            expire: from_sql(row.get(1)?),
                            invalidate: from_sql(row.get(2)?),
                        },
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    fn insert_item(
        &self,
        identifier: &str,
        content: &Content,
        expiry: Option<Expiry>,
    ) -> CacheResult<ItemId> {
        let expiry = expiry.unwrap_or(Expiry::NEVER);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // a plain delete fires the cascade, `INSERT OR REPLACE` would not
        tx.execute(
            "DELETE FROM items WHERE identifier = ?1",
            params![identifier],
        )?;
        tx.execute(
            "INSERT INTO items (identifier, expire, invalidate, content) VALUES (?1, ?2, ?3, ?4)",
            params![
                identifier,
                to_sql(expiry.expire),
                to_sql(expiry.invalidate),
                content.encode()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ItemId::new(id.to_string()))
    }

    fn touch(&self, id: &ItemId, expiry: Expiry) -> CacheResult<()> {
        self.conn.lock().execute(
            "UPDATE items SET expire = ?2, invalidate = ?3 WHERE id = ?1",
            params![row_id(id)?, to_sql(expiry.expire), to_sql(expiry.invalidate)],
        )?;
        Ok(())
    }

    fn get_item_content(&self, id: &ItemId) -> CacheResult<Option<Content>> {
        let content = self
            .conn
            .lock()
            .query_row(
                "SELECT content FROM items WHERE id = ?1",
                params![row_id(id)?],
                |row| row.get(0),
            )
            .optional()?;
        decode(content)
    }

    fn get_permutation_content(
        &self,
        id: &ItemId,
        permutation: &str,
    ) -> CacheResult<Option<Content>> {
        let content = self
            .conn
            .lock()
            .query_row(
                "SELECT content FROM permutations WHERE item_id = ?1 AND identifier = ?2",
                params![row_id(id)?, permutation],
                |row| row.get(0),
            )
            .optional()?;
        decode(content)
    }

    fn insert_permutation(
        &self,
        id: &ItemId,
        permutation: &str,
        content: &Content,
    ) -> CacheResult<()> {
        let inserted = self.conn.lock().execute(
            "INSERT OR REPLACE INTO permutations (item_id, identifier, content)
                SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM items WHERE id = ?1)",
            params![row_id(id)?, permutation, content.encode()],
        )?;
        if inserted == 0 {
            tracing::debug!(%id, permutation, "Dropped permutation of a replaced item");
        }
        Ok(())
    }

    fn lock_item(&self, _identifier: &str) -> CacheResult<Option<LockGuard>> {
        Ok(None)
    }
}
