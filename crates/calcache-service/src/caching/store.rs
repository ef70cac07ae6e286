use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CacheResult, Content, Driver, Expiry, LockGuard};

/// A driver-specific handle of a stored item.
///
/// The SQLite driver uses row ids, the filesystem driver the hashed identifier. Ids are only
/// meaningful to the driver that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a driver knows about an item without loading its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    pub id: ItemId,
    pub expiry: Expiry,
}

/// The outcome of a [`ItemStore::clean`] call.
///
/// The timestamps are the last time each pass ran, including the current call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanStatus {
    pub last_invalidate: u64,
    pub last_vacuum: u64,
    pub invalidated: bool,
    pub vacuumed: bool,
}

/// Requests for one maintenance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanRequest {
    /// The current time.
    pub now: u64,
    /// Minimum time since the last invalidate pass.
    pub invalidate_interval: Duration,
    /// Minimum time since the last vacuum pass.
    pub vacuum_interval: Duration,
}

/// Driver settings reported for diagnostics.
pub type SysConfig = BTreeMap<&'static str, String>;

/// The storage contract of the item/permutation cache.
///
/// Every driver implements exactly the same semantics, the [`ItemCache`](super::ItemCache)
/// never needs to know which one it is talking to.
pub trait ItemStore: fmt::Debug + Send + Sync {
    /// The registry entry this store was created from.
    fn driver(&self) -> Driver;

    /// Verifies that everything the driver needs at runtime is available.
    fn depends(&self) -> CacheResult<()>;

    /// Reports driver settings for diagnostics.
    fn sysconfig(&self) -> SysConfig;

    /// Best-effort number of content bytes stored across items and permutations.
    fn size(&self) -> CacheResult<u64>;

    /// Runs whichever maintenance passes are due.
    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus>;

    fn get_meta(&self, name: &str) -> CacheResult<Option<String>>;

    fn set_meta(&self, name: &str, value: &str) -> CacheResult<()>;

    /// Looks up the id and expiry of the item stored under `identifier`.
    fn get_item_meta(&self, identifier: &str) -> CacheResult<Option<ItemMeta>>;

    /// Stores `content` under `identifier`, replacing any previous item and its permutations.
    ///
    /// Without an explicit `expiry` the item never expires until it is touched.
    fn insert_item(
        &self,
        identifier: &str,
        content: &Content,
        expiry: Option<Expiry>,
    ) -> CacheResult<ItemId>;

    /// Rewrites both expiry instants of an item. Unknown ids are ignored.
    fn touch(&self, id: &ItemId, expiry: Expiry) -> CacheResult<()>;

    fn get_item_content(&self, id: &ItemId) -> CacheResult<Option<Content>>;

    fn get_permutation_content(
        &self,
        id: &ItemId,
        permutation: &str,
    ) -> CacheResult<Option<Content>>;

    /// Stores a permutation. Permutations of items that no longer exist are dropped.
    fn insert_permutation(&self, id: &ItemId, permutation: &str, content: &Content)
    -> CacheResult<()>;

    /// Excludes other processes from filling `identifier` until the guard is dropped.
    ///
    /// Drivers without cross-process locking return `None`. Their individual writes are atomic.
    fn lock_item(&self, identifier: &str) -> CacheResult<Option<LockGuard>>;
}
