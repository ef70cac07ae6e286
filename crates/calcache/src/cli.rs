//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use calcache_service::caching::{Caches, SystemClock};
use calcache_service::config::Config;
use calcache_service::maintenance::Maintenance;
use calcache_service::metrics;
use clap::{Parser, Subcommand};

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Calcache commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Run one maintenance pass over both caches.
    ///
    /// Passes that are not yet due according to the configured intervals are skipped.
    Cleanup,

    /// Check whether a running server responds.
    Healthcheck {
        /// Address of the server, defaults to the configured bind address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(author, version, about, bin_name = "calcache")]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, no runtime has been started yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Cleanup => cleanup(&config).context("failed to clean up caches")?,
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(&config, addr, timeout)?,
    }

    Ok(())
}

/// Runs maintenance once, outside of the server.
fn cleanup(config: &Config) -> Result<()> {
    let caches = Caches::from_config(config, Arc::new(SystemClock))?;
    caches.depends()?;
    let report = Maintenance::from_config(&config.maintenance).run(&caches)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
