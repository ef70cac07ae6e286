//! Helpers for testing the cache service and the web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The caches create their directories lazily, so a directory
//!    dropped too early is silently recreated and leaked. Assign it to a variable in the test
//!    function (e.g. `let cache_dir = test::tempdir()`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use calcache_service::caching::{Caches, Driver, ManualClock};
use calcache_service::config::{Config, LockConfig};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// The time every [`ManualClock`] handed out by [`caches`] starts at.
pub const EPOCH: u64 = 1_700_000_000;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the calcache crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("calcache_service=trace,calcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A config with short lock timeouts, storing everything in `cache_dir` with `driver`.
pub fn config(cache_dir: &TempDir, driver: Driver) -> Config {
    Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        cal_driver: driver,
        kval_driver: driver,
        locking: LockConfig {
            timeout: Duration::from_millis(200),
            stale_after: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
        },
        ..Config::default()
    }
}

/// Opens caches driven by a manual clock starting at [`EPOCH`].
pub fn caches(config: &Config) -> (Caches, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(EPOCH));
    let caches = Caches::from_config(config, clock.clone()).unwrap();
    (caches, clock)
}

/// Both storage drivers, for tests that have to hold for each of them.
pub const DRIVERS: [Driver; 2] = [Driver::Sqlite, Driver::Filesystem];

/// A web server bound to an ephemeral port on localhost.
///
/// The server is shut down when this handle is dropped, so hold it until all requests were made.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Serves `router` on the current runtime.
    pub async fn with_router(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}/{}", self.socket, path)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
