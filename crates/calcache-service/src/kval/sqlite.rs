use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{KvalEntry, KvalStore, decode_value, encode_value, invalidate_before};
use crate::caching::{
    CacheResult, CleanRequest, CleanStatus, Driver, SysConfig, from_sql, get_meta,
    open_connection, run_due_passes, set_meta, sqlite_depends, to_sql,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kval (
        key TEXT NOT NULL UNIQUE,
        item BLOB NOT NULL,
        timestamp INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_kval_timestamp ON kval (timestamp);
    CREATE TABLE IF NOT EXISTS meta (
        name TEXT NOT NULL UNIQUE,
        value TEXT
    );
";

/// Key-value store backed by a single SQLite table.
#[derive(Debug)]
pub struct SqliteKvalStore {
    path: PathBuf,
    quota: u64,
    ttl: Duration,
    conn: Mutex<Connection>,
}

impl SqliteKvalStore {
    pub fn open(path: &Path, quota: u64, ttl: Duration) -> CacheResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_owned(),
            quota,
            ttl,
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
                "DELETE FROM kval WHERE rowid = (
                    SELECT rowid FROM kval ORDER BY timestamp ASC, rowid ASC LIMIT 1
                )",
                [],
            )?;
            if deleted == 0 {
                break;
            }
            evicted += deleted;
        }
        if evicted > 0 {
            tracing::info!(evicted, quota = self.quota, "Evicted key-value entries over quota");
        }
        Ok(())
    }
}

impl KvalStore for SqliteKvalStore {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn depends(&self) -> CacheResult<()> {
        sqlite_depends(&self.conn.lock())
    }

    fn sysconfig(&self) -> SysConfig {
        let mut config = SysConfig::new();
        config.insert("driver", Driver::Sqlite.to_string());
        config.insert("path", self.path.display().to_string());
        config.insert("quota", self.quota.to_string());
        config.insert("ttl", format!("{}s", self.ttl.as_secs()));
        config.insert("sqlite_version", rusqlite::version().to_owned());
        config
    }

    fn size(&self) -> CacheResult<u64> {
        let size: i64 = self.conn.lock().query_row(
            "SELECT COALESCE(SUM(LENGTH(item)), 0) FROM kval",
            [],
            |row| row.get(0),
        )?;
        Ok(from_sql(size))
    }

    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus> {
        run_due_passes(
            request,
            |name| get_meta(&self.conn.lock(), name),
            |name, value| set_meta(&self.conn.lock(), name, value),
            || {
                if let Some(cutoff) = invalidate_before(request.now, self.ttl) {
                    let deleted = self.conn.lock().execute(
                        "DELETE FROM kval WHERE timestamp < ?1",
                        params![to_sql(cutoff)],
                    )?;
                    tracing::info!(deleted, "Deleted hard-expired key-value entries");
                }
                Ok(())
            },
            || {
                self.evict_oldest()?;
                self.conn.lock().execute_batch("VACUUM;")?;
                Ok(())
            },
        )
    }

    fn key(&self, key: &str) -> String {
        key.to_owned()
    }

    fn get_item(&self, key: &str) -> CacheResult<Option<KvalEntry>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT item, timestamp FROM kval WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        row.map(|(item, timestamp)| {
            Ok(KvalEntry {
                value: decode_value(&item)?,
                timestamp: from_sql(timestamp),
            })
        })
        .transpose()
    }

    fn set_item(&self, key: &str, value: &[u8], timestamp: u64) -> CacheResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO kval (key, item, timestamp) VALUES (?1, ?2, ?3)",
            params![key, encode_value(value), to_sql(timestamp)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM kval WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }
}
