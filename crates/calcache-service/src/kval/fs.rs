use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;

use super::{KvalEntry, KvalStore, decode_value, encode_value, invalidate_before};
use crate::caching::lock::{FsLock, is_bookkeeping, write_atomically_stamped};
use crate::caching::{
    CacheResult, CleanRequest, CleanStatus, Driver, SysConfig, check_writable, hash_name,
    run_due_passes,
};

/// Key-value store keeping one file per key.
///
/// Files are named by the hash of their key and carry the write time as their modification
/// time. Unlike the filesystem item store, maintenance deletes entries selectively.
#[derive(Debug)]
pub struct FsKvalStore {
    root: PathBuf,
    quota: u64,
    ttl: Duration,
    lock: FsLock,
}

impl FsKvalStore {
    pub fn open(root: PathBuf, quota: u64, ttl: Duration, lock: FsLock) -> CacheResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            quota,
            ttl,
            lock,
        })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Lists all entries as `(path, timestamp, size)`.
    fn entries(&self) -> CacheResult<Vec<(PathBuf, u64, u64)>> {
        let mut entries = vec![];
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if is_bookkeeping(&self.root, &path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            entries.push((path, timestamp_of(&metadata), metadata.len()));
        }
        Ok(entries)
    }

    fn remove(&self, path: &Path) -> CacheResult<bool> {
        let _guard = self.lock.acquire(path)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn evict_oldest(&self) -> CacheResult<()> {
        if self.quota == 0 {
            return Ok(());
        }
        let mut entries = self.entries()?;
        let mut size: u64 = entries.iter().map(|(_, _, len)| len).sum();
        entries.sort_by_key(|(_, timestamp, _)| *timestamp);

        let mut evicted = 0;
        for (path, _, len) in entries {
            if size <= self.quota {
                break;
            }
            self.remove(&path)?;
            size = size.saturating_sub(len);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::info!(evicted, quota = self.quota, "Evicted key-value entries over quota");
        }
        Ok(())
    }
}

fn timestamp_of(metadata: &fs::Metadata) -> u64 {
    let mtime = FileTime::from_last_modification_time(metadata);
    u64::try_from(mtime.unix_seconds()).unwrap_or(0)
}

impl KvalStore for FsKvalStore {
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
        config.insert("ttl", format!("{}s", self.ttl.as_secs()));
        config.insert("owner", self.lock.owner().to_string());
        config
    }

    fn size(&self) -> CacheResult<u64> {
        Ok(self.entries()?.iter().map(|(_, _, len)| len).sum())
    }

    fn clean(&self, request: CleanRequest) -> CacheResult<CleanStatus> {
        run_due_passes(
            request,
            |name| self.lock.read_meta(&self.root, name),
            |name, value| self.lock.write_meta(&self.root, name, value),
            || {
                let Some(cutoff) = invalidate_before(request.now, self.ttl) else {
                    return Ok(());
                };
                let mut deleted = 0;
                for (path, timestamp, _) in self.entries()? {
                    if timestamp < cutoff && self.remove(&path)? {
                        deleted += 1;
                    }
                }
                tracing::info!(deleted, "Deleted hard-expired key-value entries");
                Ok(())
            },
            || self.evict_oldest(),
        )
    }

    fn key(&self, key: &str) -> String {
        hash_name(key)
    }

    fn get_item(&self, key: &str) -> CacheResult<Option<KvalEntry>> {
        let path = self.path(key);
        let (bytes, metadata) = match fs::read(&path).and_then(|b| Ok((b, fs::metadata(&path)?)))
        {
            Ok(found) => found,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(KvalEntry {
            value: decode_value(&bytes)?,
            timestamp: timestamp_of(&metadata),
        }))
    }

    fn set_item(&self, key: &str, value: &[u8], timestamp: u64) -> CacheResult<()> {
        let path = self.path(key);
        let _guard = self.lock.acquire(&path)?;
        let mtime = FileTime::from_unix_time(i64::try_from(timestamp).unwrap_or(i64::MAX), 0);
        write_atomically_stamped(&path, &encode_value(value), mtime)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        self.remove(&self.path(key))
    }
}
