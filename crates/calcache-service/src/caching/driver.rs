use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::fs::FsItemStore;
use super::lock::FsLock;
use super::sqlite::SqliteItemStore;
use super::{CacheError, CacheResult, ItemStore};
use crate::kval::{FsKvalStore, KvalStore, SqliteKvalStore};

/// The registry of storage drivers.
///
/// Every cache family resolves its driver once from configuration and talks to it through a
/// trait object afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// An embedded SQLite database file.
    Sqlite,
    /// One directory per entry, serialized with lock files.
    Filesystem,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Self::Sqlite),
            "filesystem" => Ok(Self::Filesystem),
            other => Err(CacheError::UnknownDriver(other.to_owned())),
        }
    }
}

/// Where and how a store keeps its data.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// The base cache directory.
    pub cache_dir: PathBuf,
    /// The name of the cache family, used for the file or directory name.
    pub name: &'static str,
    /// Size quota in bytes, `0` disables vacuuming.
    pub quota: u64,
    /// The lock used by the filesystem driver.
    pub lock: FsLock,
}

impl StoreOptions {
    fn database_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.sqlite", self.name))
    }

    fn directory(&self) -> PathBuf {
        self.cache_dir.join(self.name)
    }
}

/// Opens the item store `driver` names.
pub fn open_item_store(driver: Driver, options: &StoreOptions) -> CacheResult<Box<dyn ItemStore>> {
    tracing::debug!(%driver, name = options.name, "Opening item store");
    Ok(match driver {
        Driver::Sqlite => Box::new(SqliteItemStore::open(
            &options.database_path(),
            options.quota,
        )?),
        Driver::Filesystem => Box::new(FsItemStore::open(
            options.directory(),
            options.quota,
            options.lock.clone(),
        )?),
    })
}

/// Opens the key-value store `driver` names.
///
/// `ttl` is the default maximum age, entries older than twice of it are dropped by maintenance.
pub fn open_kval_store(
    driver: Driver,
    options: &StoreOptions,
    ttl: std::time::Duration,
) -> CacheResult<Box<dyn KvalStore>> {
    tracing::debug!(%driver, name = options.name, "Opening key-value store");
    Ok(match driver {
        Driver::Sqlite => Box::new(SqliteKvalStore::open(
            &options.database_path(),
            options.quota,
            ttl,
        )?),
        Driver::Filesystem => Box::new(FsKvalStore::open(
            options.directory(),
            options.quota,
            ttl,
            options.lock.clone(),
        )?),
    })
}

/// Ensures `path` is a directory we can write into.
pub(crate) fn check_writable(path: &Path) -> CacheResult<()> {
    std::fs::create_dir_all(path)?;
    let probe = tempfile::NamedTempFile::new_in(path)?;
    probe.close()?;
    Ok(())
}
