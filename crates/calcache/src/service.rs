//! Shared state of the web server.
//!
//! All cache operations are blocking. Handlers hand them to the blocking pool of the runtime
//! through [`RequestService::run_blocking`] instead of stalling the web workers.

use std::sync::Arc;

use anyhow::{Context, Result};
use calcache_service::caching::{CacheResult, Caches, Clock, Driver, SysConfig};
use calcache_service::config::Config;
use calcache_service::maintenance::{Maintenance, MaintenanceReport};
use serde::Serialize;
use tokio::task::JoinError;

/// Storage details of one cache family, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyStatus {
    pub driver: Driver,
    pub size: u64,
    pub sysconfig: SysConfig,
}

/// Storage details of both cache families.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cal: FamilyStatus,
    pub kval: FamilyStatus,
}

#[derive(Debug)]
struct ServiceInner {
    caches: Caches,
    maintenance: Maintenance,
    api_key: Option<String>,
}

/// Cheaply cloneable handle to the caches, shared by all request handlers.
#[derive(Debug, Clone)]
pub struct RequestService {
    inner: Arc<ServiceInner>,
}

impl RequestService {
    /// Opens the configured caches and checks that their drivers are usable.
    pub fn create(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let caches = Caches::from_config(config, clock).context("failed to open caches")?;
        caches.depends().context("cache driver is not usable")?;

        Ok(Self {
            inner: Arc::new(ServiceInner {
                caches,
                maintenance: Maintenance::from_config(&config.maintenance),
                api_key: config.maintenance.api_key.clone(),
            }),
        })
    }

    pub fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    /// Checks a key presented to the maintenance endpoint.
    ///
    /// Without a configured key, every request is refused.
    pub fn is_authorized(&self, presented: Option<&str>) -> bool {
        match (&self.inner.api_key, presented) {
            (Some(expected), Some(presented)) => expected == presented,
            _ => false,
        }
    }

    /// Runs `f` with the caches on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<CacheResult<T>, JoinError>
    where
        F: FnOnce(&Caches) -> CacheResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.clone();
        tokio::task::spawn_blocking(move || f(service.caches())).await
    }

    /// Runs a maintenance pass over both caches.
    pub async fn maintenance(&self) -> Result<CacheResult<MaintenanceReport>, JoinError> {
        let maintenance = self.inner.maintenance;
        self.run_blocking(move |caches| maintenance.run(caches))
            .await
    }

    /// Collects sizes and storage details of both caches.
    pub async fn status(&self) -> Result<CacheResult<CacheStatus>, JoinError> {
        self.run_blocking(|caches| {
            let items = caches.items.store();
            let kval = caches.kval.store();
            Ok(CacheStatus {
                cal: FamilyStatus {
                    driver: items.driver(),
                    size: items.size()?,
                    sysconfig: items.sysconfig(),
                },
                kval: FamilyStatus {
                    driver: kval.driver(),
                    size: kval.size()?,
                    sysconfig: kval.sysconfig(),
                },
            })
        })
        .await
    }
}
