use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use calcache_service::caching::SystemClock;
use calcache_service::config::Config;
use calcache_service::metric;

use crate::endpoints;
use crate::service::RequestService;

/// Opens the caches and serves HTTP requests until the process is stopped.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("calcache-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let service = RequestService::create(&config, Arc::new(SystemClock))
        .context("failed to create HTTP service state")?;
    let socket = config.bind.parse::<SocketAddr>()?;
    let server = axum_server::bind(socket).serve(endpoints::create_app(service).into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    web_pool.block_on(server)?;
    tracing::info!("System shutdown complete");

    Ok(())
}
