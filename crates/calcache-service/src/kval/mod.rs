//! The flat key-value cache.
//!
//! A sibling of the [item cache](crate::caching::ItemCache) without the permutation tier.
//! Entries store their write time instead of an expiry, the maximum age is decided by each
//! read. Entries older than twice the configured TTL are dropped by maintenance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::caching::{
    CacheResult, CleanRequest, CleanStatus, Clock, Content, Driver, Freshness, SysConfig,
};

mod fs;
mod sqlite;

pub use fs::FsKvalStore;
pub use sqlite::SqliteKvalStore;

/// A stored key-value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvalEntry {
    pub value: Vec<u8>,
    /// When the entry was last written.
    pub timestamp: u64,
}

/// The storage contract of the key-value cache.
pub trait KvalStore: fmt::Debug + Send + Sync {
    fn driver(&self) -> Driver;

    fn depends(&self) -> CacheResult<()>;

    fn sysconfig(&self) -> SysConfig;

    /// Number of value bytes stored.
    fn size(&self) -> CacheResult<u64>;

    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus>;

    /// Maps a caller key to the key the driver stores it under.
    fn key(&self, key: &str) -> String;

    /// Loads an entry by its storage key.
    fn get_item(&self, key: &str) -> CacheResult<Option<KvalEntry>>;

    /// Writes an entry by its storage key, replacing the previous one.
    fn set_item(&self, key: &str, value: &[u8], timestamp: u64) -> CacheResult<()>;

    /// Deletes an entry by its storage key. Returns whether there was one.
    fn delete(&self, key: &str) -> CacheResult<bool>;
}

pub(crate) fn encode_value(value: &[u8]) -> Vec<u8> {
    Content::Data(value.to_vec()).encode()
}

pub(crate) fn decode_value(bytes: &[u8]) -> CacheResult<Vec<u8>> {
    // failure markers are never written to this cache
    Ok(Content::decode(bytes)?.into_data().unwrap_or_default())
}

/// The key-value cache.
#[derive(Debug)]
pub struct KvalCache {
    store: Box<dyn KvalStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl KvalCache {
    pub fn new(store: Box<dyn KvalStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn store(&self) -> &dyn KvalStore {
        self.store.as_ref()
    }

    /// Returns the value stored under `key` if it is younger than `max_age`.
    ///
    /// `None` uses the configured TTL, a zero `max_age` accepts entries of any age.
    pub fn get(&self, key: &str, max_age: Option<Duration>) -> CacheResult<Option<Vec<u8>>> {
        let max_age = max_age.unwrap_or(self.ttl);
        let driver = self.store.driver().as_str();
        let entry = self.store.get_item(&self.store.key(key))?;

        match entry {
            Some(entry) if self.is_fresh(&entry, max_age) => {
                metric!(counter("caches.kval.hit") += 1, "driver" => driver);
                Ok(Some(entry.value))
            }
            _ => {
                metric!(counter("caches.kval.miss") += 1, "driver" => driver);
                Ok(None)
            }
        }
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn set(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.store
            .set_item(&self.store.key(key), value, self.clock.now())
    }

    /// Deletes the value stored under `key`. Returns whether there was one.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        self.store.delete(&self.store.key(key))
    }

    /// Returns the value stored under `key`, calling `create` if it is missing or too old.
    ///
    /// When `create` fails the previous value, however old, is stamped fresh and returned.
    /// Without a previous value the failure is not cached and `None` is returned.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub fn value<F>(
        &self,
        key: &str,
        max_age: Option<Duration>,
        create: F,
    ) -> CacheResult<Option<Vec<u8>>>
    where
        F: FnOnce(&str) -> Option<Vec<u8>>,
    {
        let max_age = max_age.unwrap_or(self.ttl);
        let driver = self.store.driver().as_str();
        let storage_key = self.store.key(key);
        let existing = self.store.get_item(&storage_key)?;

        if let Some(entry) = &existing {
            if self.is_fresh(entry, max_age) {
                metric!(counter("caches.kval.hit") += 1, "driver" => driver);
                return Ok(Some(entry.value.clone()));
            }
        }
        metric!(counter("caches.kval.miss") += 1, "driver" => driver);

        let now = self.clock.now();
        match (create(key), existing) {
            (Some(value), _) => {
                self.store.set_item(&storage_key, &value, now)?;
                Ok(Some(value))
            }
            (None, Some(entry)) => {
                tracing::warn!("Creating value failed, serving the previous one");
                self.store.set_item(&storage_key, &entry.value, now)?;
                Ok(Some(entry.value))
            }
            (None, None) => {
                tracing::debug!("Creating value failed");
                Ok(None)
            }
        }
    }

    fn is_fresh(&self, entry: &KvalEntry, max_age: Duration) -> bool {
        Freshness::of_timestamp(entry.timestamp, max_age, self.clock.now()).is_fresh()
    }
}

/// The cutoff before which entries are hard-expired, `None` if entries never expire.
pub(crate) fn invalidate_before(now: u64, ttl: Duration) -> Option<u64> {
    match ttl.as_secs() {
        0 => None,
        ttl => Some(now.saturating_sub(ttl.saturating_mul(2))),
    }
}
