//! Calcache.
//!
//! Calcache is a standalone cache service for resources that are slow or unreliable to produce.
//! It keeps items with lazily computed permutations and a flat key-value cache on local disk,
//! and exposes a maintenance endpoint through which an external scheduler triggers eviction.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;
mod service;


fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
