use std::cell::Cell;
use std::sync::Arc;

use calcache_service::caching::{Caches, Driver, ManualClock};
use calcache_service::config::Config;
use calcache_test as test;

pub use test::{DRIVERS, EPOCH};

/// Setup tests and open caches backed by `driver`.
///
/// Returns the caches, the clock driving them and the temporary cache directory. The directory
/// is cleaned up when the [`TempDir`](test::TempDir) instance is dropped. Keep it as guard until
/// the test has finished.
pub fn setup_caches(
    driver: Driver,
    update_config: impl FnOnce(&mut Config),
) -> (Caches, Arc<ManualClock>, test::TempDir) {
    test::setup();

    let cache_dir = test::tempdir();
    let mut config = test::config(&cache_dir, driver);
    update_config(&mut config);

    let (caches, clock) = test::caches(&config);
    (caches, clock, cache_dir)
}

/// A callback that counts its invocations and returns a fixed result.
pub struct Counted {
    result: Option<Vec<u8>>,
    calls: Cell<usize>,
}

impl Counted {
    pub fn ok(result: &[u8]) -> Self {
        Self {
            result: Some(result.to_vec()),
            calls: Cell::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: Cell::new(0),
        }
    }

    pub fn call<T: ?Sized>(&self, _input: &T) -> Option<Vec<u8>> {
        self.calls.set(self.calls.get() + 1);
        self.result.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}
