//! Tracing setup shared by the binaries: ANSI stdout plus a plain-text log file.

use anyhow::Context;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber writing to stdout and `log_file`.
///
/// The log file is always created. Returns `false` when a subscriber was already
/// installed in this process (the earlier one keeps receiving events).
pub fn init_logging(log_file: &Path) -> anyhow::Result<bool> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log dir {}", parent.display()))?;
    }
    let file = File::create(log_file)
        .with_context(|| format!("creating log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    Ok(installed)
}
