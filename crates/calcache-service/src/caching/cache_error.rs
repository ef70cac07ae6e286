use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// An error raised by a cache storage driver.
///
/// A failing refresh or transform callback is never reported through this type. Those are
/// regular cache outcomes (negative caching, resurrection). Everything here is a genuine
/// storage problem and is propagated to the caller without retries.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the cache directory failed.
    #[error("cache i/o failed")]
    Io(#[from] io::Error),

    /// The embedded database reported an error.
    #[error("cache database error")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored content could not be decoded.
    ///
    /// This usually means the entry was written by an incompatible version, or was truncated.
    #[error("malformed cache content: {0}")]
    Codec(String),

    /// Another process held the lock on `path` for longer than the configured timeout.
    ///
    /// The write that needed the lock was not performed.
    #[error("timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// An item id that was not produced by the driver it was handed to.
    #[error("invalid item id `{0}`")]
    InvalidItemId(String),

    /// The cache needs a directory, but none was configured.
    #[error("no cache directory configured")]
    NotConfigured,

    /// The driver cannot operate in this environment.
    #[error("cache driver unavailable: {0}")]
    Dependency(String),

    /// The requested driver name is not part of the registry.
    #[error("unknown cache driver `{0}`")]
    UnknownDriver(String),
}

impl From<tempfile::PersistError> for CacheError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

impl From<walkdir::Error> for CacheError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

/// The result of any cache storage operation.
pub type CacheResult<T> = Result<T, CacheError>;
