use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::cleanup::run_due_passes;
use super::driver::check_writable;
use super::lock::{FsLock, LockGuard, META_DIR, is_bookkeeping, write_atomically};
use super::store::SysConfig;
use super::{
    CacheError, CacheResult, CleanRequest, CleanStatus, Content, Driver, Expiry, ItemId, ItemMeta,
    ItemStore, hash_name,
};

const ITEM_FILE: &str = "item";
const META_FILE: &str = "meta";

/// Item store keeping one directory per item.
///
/// ```text
/// <root>/<hash(identifier)>/item
/// <root>/<hash(identifier)>/meta                  "<expire> <invalidate>"
/// <root>/<hash(identifier)>/<hash(permutation)>
/// <root>/_meta_/<hash(name)>.txt
/// ```
///
/// Writes to an item directory hold the lock over that directory. Maintenance is coarse: a due
/// pass either leaves the tree alone or wipes every item in it.
#[derive(Debug)]
pub struct FsItemStore {
    root: PathBuf,
    quota: u64,
    lock: FsLock,
}

impl FsItemStore {
    pub fn open(root: PathBuf, quota: u64, lock: FsLock) -> CacheResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root, quota, lock })
    }

    fn item_dir(&self, id: &ItemId) -> CacheResult<PathBuf> {
        let is_hash = id.as_str().len() == 64 && id.as_str().bytes().all(|b| b.is_ascii_hexdigit());
        if !is_hash {
            return Err(CacheError::InvalidItemId(id.to_string()));
        }
        Ok(self.root.join(id.as_str()))
    }

    fn read_expiry(&self, dir: &Path) -> CacheResult<Option<Expiry>> {
        match fs::read_to_string(dir.join(META_FILE)) {
            Ok(meta) => parse_expiry(&meta).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns `true` if any item in the tree is past its hard expiry.
    fn has_expired_items(&self, now: u64) -> CacheResult<bool> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() || path.ends_with(META_DIR) {
                continue;
            }
            match self.read_expiry(&path) {
                Ok(Some(expiry)) if expiry.invalidate != 0 && expiry.invalidate < now => {
                    return Ok(true);
                }
                Ok(_) => {}
                // unreadable entries get wiped along with everything else
                Err(CacheError::Codec(_)) => return Ok(true),
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    /// Deletes every item, keeping metadata and lock files.
    fn wipe(&self) -> CacheResult<()> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if is_bookkeeping(&self.root, &path) {
                continue;
            }
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(root = %self.root.display(), removed, "Wiped item cache");
        Ok(())
    }
}

fn parse_expiry(meta: &str) -> CacheResult<Expiry> {
    let mut parts = meta.split_whitespace().map(str::parse::<u64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(expire)), Some(Ok(invalidate)), None) => Ok(Expiry { expire, invalidate }),
        _ => Err(CacheError::Codec(format!("malformed item meta {meta:?}"))),
    }
}

fn format_expiry(expiry: Expiry) -> String {
    format!("{} {}", expiry.expire, expiry.invalidate)
}

fn read_content(path: &Path) -> CacheResult<Option<Content>> {
    match fs::read(path) {
        Ok(bytes) => Content::decode(&bytes).map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl ItemStore for FsItemStore {
    fn driver(&self) -> Driver {
        Driver::Filesystem
    }

    fn depends(&self) -> CacheResult<()> {
        check_writable(&self.root)
    }

    fn sysconfig(&self) -> SysConfig {
        let mut config = SysConfig::new();
        config.insert("driver", Driver::Filesystem.to_string());
        config.insert("path", self.root.display().to_string());
        config.insert("quota", self.quota.to_string());
        config.insert("owner", self.lock.owner().to_string());
        config
    }

    fn size(&self) -> CacheResult<u64> {
        let mut size = 0;
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || is_bookkeeping(&self.root, path)
                || path.file_name().is_some_and(|name| name == META_FILE)
            {
                continue;
            }
            size += entry.metadata()?.len();
        }
        Ok(size)
    }

    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus> {
        run_due_passes(
            request,
            |name| self.get_meta(name),
            |name, value| self.set_meta(name, value),
            || {
                if self.has_expired_items(request.now)? {
                    self.wipe()?;
                }
                Ok(())
            },
            || {
                if self.quota > 0 && self.size()? > self.quota {
                    self.wipe()?;
                }
                Ok(())
            },
        )
    }

    fn get_meta(&self, name: &str) -> CacheResult<Option<String>> {
        self.lock.read_meta(&self.root, name)
    }

    fn set_meta(&self, name: &str, value: &str) -> CacheResult<()> {
        self.lock.write_meta(&self.root, name, value)
    }

    fn get_item_meta(&self, identifier: &str) -> CacheResult<Option<ItemMeta>> {
        let id = ItemId::new(hash_name(identifier));
        let dir = self.item_dir(&id)?;
        Ok(self
            .read_expiry(&dir)?
            .map(|expiry| ItemMeta { id, expiry }))
    }

    fn insert_item(
        &self,
        identifier: &str,
        content: &Content,
        expiry: Option<Expiry>,
    ) -> CacheResult<ItemId> {
        let id = ItemId::new(hash_name(identifier));
        let dir = self.item_dir(&id)?;
        let _guard = self.lock.acquire(&dir)?;

        // drops the permutations of the previous content
        match fs::remove_dir_all(&dir) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
        fs::create_dir_all(&dir)?;

        write_atomically(&dir.join(ITEM_FILE), &content.encode())?;
        write_atomically(
            &dir.join(META_FILE),
            format_expiry(expiry.unwrap_or(Expiry::NEVER)).as_bytes(),
        )?;
        Ok(id)
    }

    fn touch(&self, id: &ItemId, expiry: Expiry) -> CacheResult<()> {
        let dir = self.item_dir(id)?;
        let _guard = self.lock.acquire(&dir)?;
        if !dir.join(ITEM_FILE).is_file() {
            tracing::debug!(%id, "Not touching a missing item");
            return Ok(());
        }
        write_atomically(&dir.join(META_FILE), format_expiry(expiry).as_bytes())
    }

    fn get_item_content(&self, id: &ItemId) -> CacheResult<Option<Content>> {
        read_content(&self.item_dir(id)?.join(ITEM_FILE))
    }

    fn get_permutation_content(
        &self,
        id: &ItemId,
        permutation: &str,
    ) -> CacheResult<Option<Content>> {
        read_content(&self.item_dir(id)?.join(hash_name(permutation)))
    }

    fn insert_permutation(
        &self,
        id: &ItemId,
        permutation: &str,
        content: &Content,
    ) -> CacheResult<()> {
        let dir = self.item_dir(id)?;
        let _guard = self.lock.acquire(&dir)?;
        if !dir.join(ITEM_FILE).is_file() {
            tracing::debug!(%id, permutation, "Dropped permutation of a missing item");
            return Ok(());
        }
        write_atomically(&dir.join(hash_name(permutation)), &content.encode())
    }

    fn lock_item(&self, identifier: &str) -> CacheResult<Option<LockGuard>> {
        // the same path the writes lock, so they re-enter this guard
        let dir = self.item_dir(&ItemId::new(hash_name(identifier)))?;
        Ok(Some(self.lock.acquire(&dir)?))
    }
}
