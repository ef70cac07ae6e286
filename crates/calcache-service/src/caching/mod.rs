//! # Cache Abstraction Layer
//!
//! Everything slow or unreliable to produce goes through one of two cache families:
//!
//! - The item/permutation cache ([`ItemCache`]) for resources such as remote feeds. Items carry a
//!   soft and a hard expiry, are refreshed through a callback once stale and have lazily
//!   computed permutations (thumbnails, rendered fragments) attached to them.
//! - The flat key-value cache ([`KvalCache`](crate::kval::KvalCache)) for small values that only
//!   need a maximum age.
//!
//! ## Expiry
//!
//! Every touch derives two instants from one TTL, see [`Expiry::from_ttl`]:
//!
//! - `expire = now + ttl`: afterwards the item is *stale*, the next read attempts a refresh but
//!   the old content is still served if that refresh fails.
//! - `invalidate = now + 2 * ttl`: afterwards the item is *expired* and maintenance may delete it.
//!
//! A TTL of `0` means "never expires" and is stored as `0` for both instants.
//!
//! ## Drivers
//!
//! Storage is pluggable through the [`ItemStore`] contract. [`Driver`] is the registry of
//! implementations and is resolved once from configuration:
//!
//! - `sqlite`: a single database file, permutations cascade with their item.
//! - `filesystem`: one directory per item, writes serialized by [lock files](lock).
//!
//! The read path never deletes anything. Deletion happens only in [`ItemStore::clean`], which is
//! triggered from the outside by the maintenance endpoint.
//!
//! ### Metrics
//!
//! All counters are tagged with the `driver`:
//!
//! - `caches.item.hit`: Fresh items served without refresh.
//! - `caches.item.refresh`: Refresh callbacks invoked.
//! - `caches.item.resurrected`: Failed refreshes answered with stale content.
//! - `caches.item.negative`: Failed refreshes that were negatively cached.
//! - `caches.item.unchanged` / `caches.item.replaced`: Outcomes of successful refreshes.
//! - `caches.permutation.hit` / `.computed` / `.failed`: Permutation lookups.
//! - `caches.lock.broken` / `caches.lock.timeout`: Contended lock files.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::kval::KvalCache;

mod cache_error;
mod cleanup;
mod content;
mod driver;
mod expiry;
mod fs;
mod items;
pub mod lock;
mod sqlite;
mod store;

pub use cache_error::{CacheError, CacheResult};
pub use cleanup::{LAST_INVALIDATE, LAST_VACUUM};
pub use content::Content;
pub use driver::{Driver, StoreOptions, open_item_store, open_kval_store};
pub use expiry::{Clock, Expiry, Freshness, ManualClock, NEGATIVE_TTL, SystemClock};
pub use fs::FsItemStore;
pub use items::ItemCache;
pub use lock::{FsLock, LockGuard, OwnerId};
pub use sqlite::SqliteItemStore;
pub use store::{CleanRequest, CleanStatus, ItemId, ItemMeta, ItemStore, SysConfig};

pub(crate) use cleanup::run_due_passes;
pub(crate) use driver::check_writable;
pub(crate) use sqlite::{from_sql, get_meta, open_connection, set_meta, sqlite_depends, to_sql};

/// Hashes a caller supplied name into a file name.
pub(crate) fn hash_name(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

/// The cache manager, holding both cache families.
///
/// It is constructed once per process (or test) from the [`Config`] and passed around by
/// reference. Nothing in this module keeps global state.
#[derive(Debug)]
pub struct Caches {
    /// The item/permutation cache.
    pub items: ItemCache,
    /// The key-value cache.
    pub kval: KvalCache,
    clock: Arc<dyn Clock>,
    owner: OwnerId,
}

impl Caches {
    /// Opens the configured drivers below [`Config::cache_dir`].
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let cache_dir = config
            .cache_dir
            .as_deref()
            .ok_or(CacheError::NotConfigured)?;
        Self::open(config, cache_dir, clock)
    }

    fn open(config: &Config, cache_dir: &Path, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        let owner = OwnerId::generate();
        let lock = FsLock::new(owner.clone(), config.locking);
        tracing::info!(
            cache_dir = %cache_dir.display(),
            cal_driver = %config.cal_driver,
            kval_driver = %config.kval_driver,
            %owner,
            "Opening caches"
        );

        let items = open_item_store(
            config.cal_driver,
            &StoreOptions {
                cache_dir: cache_dir.to_owned(),
                name: "cal",
                quota: config.cal_quota,
                lock: lock.clone(),
            },
        )?;
        let kval = open_kval_store(
            config.kval_driver,
            &StoreOptions {
                cache_dir: cache_dir.to_owned(),
                name: "kval",
                quota: config.kval_quota,
                lock,
            },
            config.kval_ttl,
        )?;

        Ok(Self {
            items: ItemCache::new(items, clock.clone(), config.cal_ttl),
            kval: KvalCache::new(kval, clock.clone(), config.kval_ttl),
            clock,
            owner,
        })
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The owner id written into lock files by this manager.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Verifies that both drivers can operate.
    pub fn depends(&self) -> CacheResult<()> {
        self.items.store().depends()?;
        self.kval.store().depends()
    }
}
