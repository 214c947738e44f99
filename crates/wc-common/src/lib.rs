//! Shared utilities for wc sessions: logging, error types, helpers.
//!
//! This crate provides infrastructure used by the session engine and the
//! `wc` binary. Library crates only emit `tracing` events; binaries call
//! [`init_tracing_with_default`] once at startup.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;

pub use error::{Error, Result};

/// Initialize tracing.
///
/// Log level is controlled by the `RUST_LOG` environment variable and falls
/// back to `default_level` if not set. `WC_LOG_TARGET=0` hides the module
/// target column.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(helpers::env_bool("WC_LOG_TARGET", true))
        .init();
}
