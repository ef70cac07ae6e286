//! The calcache service library.
//!
//! This crate contains the item/permutation cache, its storage backends, the flat key-value
//! cache and the maintenance runner. The `calcache` binary wraps all of this in an HTTP server.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod kval;
pub mod logging;
pub mod maintenance;
