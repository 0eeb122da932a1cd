//! Tracing setup for the library.
//!
//! `wayfinder` lives inside an application process, so installation is
//! best-effort: when the host already installed a subscriber, the configured
//! one is discarded and the host's stays in charge.

use crate::conf::LogConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// Env var overriding the configured level filter, e.g.
/// `WAYFINDER_LOG=wayfinder=debug`.
pub const LOG_FILTER_ENV: &str = "WAYFINDER_LOG";

/// Installs a structured-JSON subscriber per `global.log`: rolling daily
/// files under `dir` when set, stdout otherwise. Called once from client
/// construction; returns whether this library's subscriber took effect.
pub fn init_from_config(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.dir.is_empty() {
        return fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .try_init()
            .is_ok();
    }

    let appender = tracing_appender::rolling::daily(&config.dir, "wayfinder.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let installed = fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_writer(writer)
        .try_init()
        .is_ok();
    if installed {
        // The subscriber is process-wide; its writer guard must be too.
        std::mem::forget(guard);
    }
    installed
}
