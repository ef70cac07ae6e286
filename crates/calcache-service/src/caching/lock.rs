//! Advisory lock files serializing writers across processes sharing a cache directory.
//!
//! A lock over `path` is the file `path.lock` holding the [`OwnerId`] of its holder. Locks are
//! re-entrant per owner, and a lock file that was not modified for
//! [`stale_after`](LockConfig::stale_after) is assumed to belong to a crashed process and is
//! broken.
//!
//! Acquisition creates the lock file with `O_EXCL`, so two processes can never both observe an
//! absent lock and both believe they hold it. Two threads of the same process share an owner id
//! and therefore do not exclude each other.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::config::LockConfig;

use super::{CacheError, CacheResult, hash_name};

/// Name of the directory holding metadata files next to the cached entries.
pub const META_DIR: &str = "_meta_";

/// Identifies the holder of a lock.
///
/// Generated once per cache manager, which normally lives as long as the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the lock file guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

fn is_lock_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "lock")
}

/// Acquires locks on behalf of one owner.
#[derive(Debug, Clone)]
pub struct FsLock {
    owner: OwnerId,
    config: LockConfig,
}

impl FsLock {
    pub fn new(owner: OwnerId, config: LockConfig) -> Self {
        Self { owner, config }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Blocks until the lock over `path` is acquired.
    ///
    /// Fails with [`CacheError::LockTimeout`] when another owner holds a fresh lock for longer
    /// than the configured timeout. The caller must not perform the guarded write in that case.
    pub fn acquire(&self, path: &Path) -> CacheResult<LockGuard> {
        let lock_path = lock_path(path);
        let start = Instant::now();

        loop {
            if let Some(guard) = self.try_acquire_at(&lock_path)? {
                return Ok(guard);
            }

            let waited = start.elapsed();
            if waited >= self.config.timeout {
                metric!(counter("caches.lock.timeout") += 1);
                tracing::warn!(path = %lock_path.display(), ?waited, "Timed out waiting for lock");
                return Err(CacheError::LockTimeout {
                    path: lock_path,
                    waited,
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Attempts to acquire the lock over `path` without waiting.
    ///
    /// Abandoned locks are broken on the way.
    pub fn try_acquire(&self, path: &Path) -> CacheResult<Option<LockGuard>> {
        self.try_acquire_at(&lock_path(path))
    }

    fn try_acquire_at(&self, lock_path: &Path) -> CacheResult<Option<LockGuard>> {
        // a few rounds because the lock can vanish between our create and our read
        for _ in 0..3 {
            match self.create(lock_path) {
                Ok(()) => return Ok(Some(self.guard(lock_path, false))),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }

            match read_owner(lock_path)? {
                None => continue,
                Some(owner) if owner == self.owner.as_str() => {
                    return Ok(Some(self.guard(lock_path, true)));
                }
                Some(owner) => {
                    if !self.is_stale(lock_path)? {
                        return Ok(None);
                    }
                    metric!(counter("caches.lock.broken") += 1);
                    tracing::warn!(
                        path = %lock_path.display(),
                        owner,
                        "Breaking abandoned lock"
                    );
                    remove_if_exists(lock_path)?;
                }
            }
        }
        Ok(None)
    }

    fn create(&self, lock_path: &Path) -> io::Result<()> {
        let open = || {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
        };
        let mut file = match open() {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = lock_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                open()?
            }
            other => other?,
        };
        file.write_all(self.owner.as_str().as_bytes())
    }

    fn is_stale(&self, lock_path: &Path) -> CacheResult<bool> {
        let modified = match fs::metadata(lock_path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age >= self.config.stale_after)
    }

    fn guard(&self, lock_path: &Path, reentrant: bool) -> LockGuard {
        LockGuard {
            lock_path: lock_path.to_owned(),
            owner: self.owner.clone(),
            reentrant,
        }
    }

    /// Reads a metadata value stored in `root`.
    pub fn read_meta(&self, root: &Path, name: &str) -> CacheResult<Option<String>> {
        match fs::read_to_string(meta_path(root, name)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes a metadata value into `root` while holding the lock over its file.
    pub fn write_meta(&self, root: &Path, name: &str, value: &str) -> CacheResult<()> {
        let path = meta_path(root, name);
        let _guard = self.acquire(&path)?;
        write_atomically(&path, value.as_bytes())
    }
}

fn meta_path(root: &Path, name: &str) -> PathBuf {
    root.join(META_DIR).join(format!("{}.txt", hash_name(name)))
}

fn read_owner(lock_path: &Path) -> CacheResult<Option<String>> {
    match fs::read_to_string(lock_path) {
        Ok(owner) => Ok(Some(owner.trim().to_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Writes `contents` to `path` through a sibling temporary file.
///
/// Readers either see the previous file or the complete new one.
pub fn write_atomically(path: &Path, contents: &[u8]) -> CacheResult<()> {
    persist_new(path, contents, None)
}

/// Like [`write_atomically`], with the modification time set before the file becomes visible.
pub fn write_atomically_stamped(
    path: &Path,
    contents: &[u8],
    mtime: FileTime,
) -> CacheResult<()> {
    persist_new(path, contents, Some(mtime))
}

fn persist_new(path: &Path, contents: &[u8], mtime: Option<FileTime>) -> CacheResult<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(contents)?;
    if let Some(mtime) = mtime {
        filetime::set_file_mtime(temp_file.path(), mtime)?;
    }
    temp_file.persist(path)?;
    Ok(())
}

/// A held lock. The lock file is removed on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock_path: PathBuf,
    owner: OwnerId,
    reentrant: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Whether this owner already held the lock when it was acquired.
    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // the outermost acquisition releases
        if self.reentrant {
            return;
        }
        match read_owner(&self.lock_path) {
            Ok(Some(owner)) if owner == self.owner.as_str() => {
                if let Err(err) = remove_if_exists(&self.lock_path) {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        path = %self.lock_path.display(),
                        "Failed to release lock"
                    );
                }
            }
            Ok(_) => {
                tracing::debug!(path = %self.lock_path.display(), "Lock was taken over");
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    path = %self.lock_path.display(),
                    "Failed to read lock owner"
                );
            }
        }
    }
}

/// Returns `true` for paths that are bookkeeping rather than cached content.
pub(crate) fn is_bookkeeping(root: &Path, path: &Path) -> bool {
    is_lock_file(path) || path.starts_with(root.join(META_DIR))
}
