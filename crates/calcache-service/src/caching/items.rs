use std::sync::Arc;
use std::time::Duration;

use super::{CacheResult, Clock, Content, Expiry, ItemId, ItemMeta, ItemStore, NEGATIVE_TTL};

/// The item/permutation cache.
///
/// Items are slow or unreliable to produce and are refreshed through a caller supplied callback
/// once their soft expiry passed. Permutations are expensive transformations of an item's
/// content, computed lazily and dropped whenever the item content changes.
///
/// A failing refresh is not an error: an existing item is served stale ("resurrected") and a
/// missing one is negatively cached for [`NEGATIVE_TTL`]. Only storage problems surface as
/// [`CacheError`](super::CacheError).
#[derive(Debug)]
pub struct ItemCache {
    store: Box<dyn ItemStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ItemCache {
    pub fn new(store: Box<dyn ItemStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// The storage driver behind this cache.
    pub fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the id of a fresh item for `identifier`, refreshing it if needed.
    ///
    /// `refresh` is not invoked at all while the stored item is fresh. It returns `None` to
    /// signal a failed refresh.
    pub fn resolve_item<F>(&self, identifier: &str, refresh: F) -> CacheResult<ItemId>
    where
        F: FnOnce(&str) -> Option<Vec<u8>>,
    {
        self.resolve(identifier, refresh, false)
    }

    /// Like [`resolve_item`](Self::resolve_item), but refreshes even a fresh item.
    pub fn refresh_item<F>(&self, identifier: &str, refresh: F) -> CacheResult<ItemId>
    where
        F: FnOnce(&str) -> Option<Vec<u8>>,
    {
        self.resolve(identifier, refresh, true)
    }

    #[tracing::instrument(skip_all, fields(identifier = %identifier, driver = %self.store.driver()))]
    fn resolve<F>(&self, identifier: &str, refresh: F, force: bool) -> CacheResult<ItemId>
    where
        F: FnOnce(&str) -> Option<Vec<u8>>,
    {
        let driver = self.store.driver().as_str();
        let existing = self.store.get_item_meta(identifier)?;
        if let Some(id) = self.fresh_id(existing.as_ref(), force) {
            return Ok(id);
        }

        // held until the refreshed item is written
        let guard = self.store.lock_item(identifier)?;
        let existing = if guard.is_some() {
            // another process may have refreshed the item while we waited
            let existing = self.store.get_item_meta(identifier)?;
            if let Some(id) = self.fresh_id(existing.as_ref(), force) {
                return Ok(id);
            }
            existing
        } else {
            existing
        };
        let now = self.clock.now();

        metric!(counter("caches.item.refresh") += 1, "driver" => driver);
        let expiry = Expiry::from_ttl(now, self.ttl);

        let Some(data) = refresh(identifier) else {
            return match existing {
                Some(meta) => {
                    tracing::warn!("Refresh failed, serving stale item");
                    metric!(counter("caches.item.resurrected") += 1, "driver" => driver);
                    self.store.touch(&meta.id, expiry)?;
                    Ok(meta.id)
                }
                None => {
                    tracing::warn!("Refresh failed, caching the failure");
                    metric!(counter("caches.item.negative") += 1, "driver" => driver);
                    self.store.insert_item(
                        identifier,
                        &Content::Failed,
                        Some(Expiry::from_ttl(now, NEGATIVE_TTL)),
                    )
                }
            };
        };

        if let Some(meta) = existing {
            let previous = self.store.get_item_content(&meta.id)?;
            if previous.as_ref().and_then(Content::data) == Some(data.as_slice()) {
                tracing::debug!("Refreshed item is unchanged");
                metric!(counter("caches.item.unchanged") += 1, "driver" => driver);
                self.store.touch(&meta.id, expiry)?;
                return Ok(meta.id);
            }
        }

        metric!(counter("caches.item.replaced") += 1, "driver" => driver);
        self.store
            .insert_item(identifier, &Content::Data(data), Some(expiry))
    }

    /// The id of `meta` if it can be served without a refresh.
    fn fresh_id(&self, meta: Option<&ItemMeta>, force: bool) -> Option<ItemId> {
        let meta = meta?;
        if force || !meta.expiry.freshness(self.clock.now()).is_fresh() {
            return None;
        }
        let driver = self.store.driver().as_str();
        metric!(counter("caches.item.hit") += 1, "driver" => driver);
        Some(meta.id.clone())
    }

    /// Returns the content of the item for `identifier`, refreshing it if needed.
    ///
    /// `None` means the item is negatively cached.
    pub fn get_item<F>(&self, identifier: &str, refresh: F) -> CacheResult<Option<Vec<u8>>>
    where
        F: FnOnce(&str) -> Option<Vec<u8>>,
    {
        let id = self.resolve_item(identifier, refresh)?;
        Ok(self
            .store
            .get_item_content(&id)?
            .and_then(Content::into_data))
    }

    /// Returns the permutation `permutation` of the item for `identifier`.
    ///
    /// The item is resolved first, exactly like [`resolve_item`](Self::resolve_item). A stored
    /// permutation is returned as is, otherwise `transform` computes it from the item content.
    /// Failed transforms are not cached and are retried on the next call.
    #[tracing::instrument(skip_all, fields(identifier = %identifier, permutation = %permutation))]
    pub fn resolve_permutation<R, T>(
        &self,
        identifier: &str,
        refresh: R,
        permutation: &str,
        transform: T,
    ) -> CacheResult<Option<Content>>
    where
        R: FnOnce(&str) -> Option<Vec<u8>>,
        T: FnOnce(&[u8]) -> Option<Vec<u8>>,
    {
        let driver = self.store.driver().as_str();
        let id = self.resolve_item(identifier, refresh)?;

        if let Some(content) = self.store.get_permutation_content(&id, permutation)? {
            metric!(counter("caches.permutation.hit") += 1, "driver" => driver);
            return Ok(Some(content));
        }

        let _guard = self.store.lock_item(identifier)?;
        if let Some(content) = self.store.get_permutation_content(&id, permutation)? {
            metric!(counter("caches.permutation.hit") += 1, "driver" => driver);
            return Ok(Some(content));
        }

        let Some(Content::Data(item)) = self.store.get_item_content(&id)? else {
            tracing::debug!("No item content to compute the permutation from");
            return Ok(None);
        };

        match transform(&item) {
            Some(computed) => {
                metric!(counter("caches.permutation.computed") += 1, "driver" => driver);
                let content = Content::Data(computed);
                self.store.insert_permutation(&id, permutation, &content)?;
                Ok(Some(content))
            }
            None => {
                tracing::debug!("Permutation transform failed");
                metric!(counter("caches.permutation.failed") += 1, "driver" => driver);
                Ok(None)
            }
        }
    }

    /// Returns the bytes of a permutation, see [`resolve_permutation`](Self::resolve_permutation).
    pub fn get_permutation<R, T>(
        &self,
        identifier: &str,
        refresh: R,
        permutation: &str,
        transform: T,
    ) -> CacheResult<Option<Vec<u8>>>
    where
        R: FnOnce(&str) -> Option<Vec<u8>>,
        T: FnOnce(&[u8]) -> Option<Vec<u8>>,
    {
        Ok(self
            .resolve_permutation(identifier, refresh, permutation, transform)?
            .and_then(Content::into_data))
    }

    /// Extends the life of a cached item by one TTL without refreshing it.
    ///
    /// Returns `false` if nothing is cached for `identifier`.
    pub fn touch(&self, identifier: &str) -> CacheResult<bool> {
        let Some(meta) = self.store.get_item_meta(identifier)? else {
            return Ok(false);
        };
        let expiry = Expiry::from_ttl(self.clock.now(), self.ttl);
        self.store.touch(&meta.id, expiry)?;
        Ok(true)
    }

    /// Marks a cached item stale, so that the next read attempts a refresh.
    ///
    /// The content is kept around for resurrection until maintenance deletes it. Returns `false`
    /// if nothing is cached for `identifier`.
    pub fn invalidate(&self, identifier: &str) -> CacheResult<bool> {
        let Some(meta) = self.store.get_item_meta(identifier)? else {
            return Ok(false);
        };
        let now = self.clock.now();
        let expiry = Expiry {
            // `0` would mean "never expires"
            expire: now.saturating_sub(1).max(1),
            invalidate: Expiry::from_ttl(now, self.ttl).invalidate,
        };
        self.store.touch(&meta.id, expiry)?;
        Ok(true)
    }
}
