//! Tracing setup for embedding applications and tests.
//!
//! The library itself only emits `tracing` events; nothing is
//! initialized unless the embedder asks for it here or installs its own
//! subscriber.

use crate::error::Error;
use camino::Utf8Path;
use std::fs;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup logging with a daily-rolling file appender under `log_dir`.
///
/// Returns a guard that must be held for the lifetime of the program to
/// keep the background writer flushing. Does nothing if a subscriber is
/// already installed.
pub fn setup_logging(
    log_dir: &Utf8Path,
    prefix: &str,
    debug: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Error> {
    setup_logging_with_console(log_dir, prefix, debug, false)
}

/// Setup logging with optional console output alongside the rolling
/// file appender.
///
/// File logging is always active; when `console_output` is set, events
/// are additionally written to stderr with ANSI colors. Returns the
/// file writer's guard; does nothing if a subscriber is already
/// installed.
pub fn setup_logging_with_console(
    log_dir: &Utf8Path,
    prefix: &str,
    debug: bool,
    console_output: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Error> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir).map_err(|source| Error::FileWriteFailed {
            path: log_dir.to_string(),
            source,
        })?;
    }

    let appender = rolling::daily(log_dir, prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::new(if debug { "debug" } else { "info" });
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    if console_output {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false);
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init();
    }

    Ok(guard)
}
