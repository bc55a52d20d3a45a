//! Tracing subscriber bootstrap for embedding applications.

use std::fs::{self, OpenOptions};

use super::paths;

/// Install a file-backed `tracing` subscriber (~/.pagetape/logs/pagetape.log).
///
/// The filter comes from `RUST_LOG`, with WARN as the floor. Returns an error
/// if the log file cannot be opened or a global subscriber is already set.
pub fn init_file_logging() -> anyhow::Result<()> {
    fs::create_dir_all(paths::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
