//! Path utilities for pagetape data directories

use std::path::PathBuf;
use std::sync::OnceLock;

/// Set once by `init_data_dir`; otherwise the platform default is used.
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Point every path below at `custom_path` instead of `~/.pagetape`.
///
/// Only the first call wins; returns `false` when a directory was already set.
pub fn init_data_dir(custom_path: Option<PathBuf>) -> bool {
    let path = custom_path.unwrap_or_else(default_data_dir);
    match DATA_DIR.set(path) {
        Ok(()) => true,
        Err(rejected) => {
            tracing::debug!(
                rejected = %rejected.display(),
                current = %data_dir().display(),
                "Data directory already set, ignoring override"
            );
            false
        }
    }
}

/// Get the default data directory path (~/.pagetape)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".pagetape"))
        .unwrap_or_else(|| PathBuf::from(".pagetape"))
}

/// Get the base data directory.
/// Returns the custom path if set via init_data_dir(), otherwise ~/.pagetape
pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

/// Get the session database path (~/.pagetape/sessions.db)
pub fn database_path() -> PathBuf {
    data_dir().join("sessions.db")
}

/// Get the logs directory (~/.pagetape/logs)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the default log file path (~/.pagetape/logs/pagetape.log)
pub fn log_file_path() -> PathBuf {
    logs_dir().join("pagetape.log")
}

/// Get the config file path (~/.pagetape/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
