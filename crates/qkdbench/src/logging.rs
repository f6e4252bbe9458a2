//! Console logging shared by the benchmark binaries.

use std::str::FromStr;

use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, prelude::*};

use crate::{Error, Result};

/// Initialize the logging receiver for things to be logged into using the
/// tracing / tracing_subscriber libraries.
///
/// KME hostnames and account identifiers are wrapped with
/// `safelog::sensitive` and scrubbed unless `unsafe_logging` is set. Keep the
/// returned guard alive for the lifetime of the process.
pub fn init_logging_recvr(unsafe_logging: bool, level_str: &str) -> Result<safelog::Guard> {
    let log_lvl = LevelFilter::from_str(level_str)
        .map_err(|e| Error::InvalidArgument(format!("log level \"{level_str}\": {e}")))?;

    // stdout carries progress and summaries, logs go to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(log_lvl);

    tracing_subscriber::registry()
        .with(console_layer.boxed())
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {e}")))?;

    let guard = if unsafe_logging {
        warn!("unsafe logging enabled, KME addresses will appear in logs");
        safelog::disable_safe_logging()
    } else {
        info!("log level set to {level_str}");
        safelog::enforce_safe_logging()
    };
    guard.map_err(|e| Error::Config(format!("failed to get safelog guard: {e}")))
}
