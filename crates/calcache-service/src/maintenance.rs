//! Pull-based cache maintenance.
//!
//! Nothing in calcache evicts entries on its own. An external scheduler periodically calls the
//! maintenance endpoint (or runs `calcache cleanup`), which ends up in [`Maintenance::run`].
//! Each cache family then decides from its stored bookkeeping whether its invalidate or vacuum
//! pass is due.

use std::time::Duration;

use serde::Serialize;

use crate::caching::{CacheResult, Caches, CleanRequest, CleanStatus};
use crate::config::MaintenanceConfig;

/// The outcome of one maintenance run, per cache family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub cal: CleanStatus,
    pub kval: CleanStatus,
}

/// Runs maintenance passes with the configured intervals.
#[derive(Debug, Clone, Copy)]
pub struct Maintenance {
    invalidate_interval: Duration,
    vacuum_interval: Duration,
}

impl Maintenance {
    pub fn new(invalidate_interval: Duration, vacuum_interval: Duration) -> Self {
        Self {
            invalidate_interval,
            vacuum_interval,
        }
    }

    pub fn from_config(config: &MaintenanceConfig) -> Self {
        Self::new(config.invalidate_interval, config.vacuum_interval)
    }

    /// Cleans both cache families and reports their sizes.
    pub fn run(&self, caches: &Caches) -> CacheResult<MaintenanceReport> {
        let request = CleanRequest {
            now: caches.clock().now(),
            invalidate_interval: self.invalidate_interval,
            vacuum_interval: self.vacuum_interval,
        };

        let cal = caches.items.store().clean(request)?;
        let kval = caches.kval.store().clean(request)?;

        let cal_size = caches.items.store().size()?;
        let kval_size = caches.kval.store().size()?;
        metric!(gauge("caches.size.bytes") = cal_size, "cache" => "cal");
        metric!(gauge("caches.size.bytes") = kval_size, "cache" => "kval");

        tracing::info!(?cal, ?kval, cal_size, kval_size, "Cache maintenance done");
        Ok(MaintenanceReport { cal, kval })
    }
}
