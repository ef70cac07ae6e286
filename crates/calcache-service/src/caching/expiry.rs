use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The TTL written into negative cache entries.
///
/// A refresh that fails for an identifier that was never cached is retried at most this often,
/// no matter how the regular TTL is configured.
pub const NEGATIVE_TTL: Duration = Duration::from_secs(300);

/// A source of "now" in whole seconds since the unix epoch.
///
/// All expiry arithmetic goes through a clock so that it can be driven manually in tests.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> u64;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// The pair of instants written on every touch.
///
/// `expire` is the soft expiry after which the next read attempts a refresh, `invalidate` the
/// hard expiry after which maintenance may delete the entry. A value of `0` means "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expiry {
    pub expire: u64,
    pub invalidate: u64,
}

impl Expiry {
    /// An expiry that never runs out.
    pub const NEVER: Self = Self {
        expire: 0,
        invalidate: 0,
    };

    /// Derives both instants from a single TTL.
    ///
    /// The hard expiry is always twice the TTL away. A zero TTL means the entry never expires.
    pub fn from_ttl(now: u64, ttl: Duration) -> Self {
        let ttl = ttl.as_secs();
        if ttl == 0 {
            return Self::NEVER;
        }
        Self {
            expire: now.saturating_add(ttl),
            invalidate: now.saturating_add(ttl.saturating_mul(2)),
        }
    }

    /// Classifies the entry against `now`.
    pub fn freshness(&self, now: u64) -> Freshness {
        if self.expire == 0 || self.expire >= now {
            Freshness::Fresh
        } else if self.invalidate != 0 && self.invalidate < now {
            Freshness::Expired
        } else {
            Freshness::Stale
        }
    }
}

/// Where an entry stands relative to its two expiry instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Can be served as is.
    Fresh,
    /// Past the soft expiry: still servable, but a refresh should be attempted.
    Stale,
    /// Past the hard expiry: maintenance is free to delete it.
    Expired,
}

impl Freshness {
    /// Classifies a key-value entry written at `timestamp`.
    ///
    /// Key-value entries store their write time rather than an expiry, the maximum age is only
    /// known at read time. A zero `max_age` is unconditionally fresh.
    pub fn of_timestamp(timestamp: u64, max_age: Duration, now: u64) -> Self {
        let max_age = max_age.as_secs();
        if max_age == 0 {
            return Self::Fresh;
        }
        Expiry {
            expire: timestamp.saturating_add(max_age),
            invalidate: timestamp.saturating_add(max_age.saturating_mul(2)),
        }
        .freshness(now)
    }

    pub fn is_fresh(self) -> bool {
        self == Self::Fresh
    }
}
