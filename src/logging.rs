//! Logging setup for the `clinqc` binary.
//!
//! Logs go to stderr and to a daily rotating file in the configured log directory
//! (`clinqc.<date>.log`, 10 files retained). The library itself only emits `tracing`
//! events; installing a subscriber is the binary's job.
//!
//! ```no_run
//! use std::path::Path;
//!
//! clinqc::logging::init(Path::new("logs"), false)?;
//! tracing::info!("Pipeline started");
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_PREFIX: &str = "clinqc";

/// Install the global subscriber.
///
/// The level defaults to `info` (`debug` when `verbose`); `RUST_LOG` overrides both.
///
/// # Errors
///
/// Returns error if the log directory cannot be created, the file appender fails, or
/// a global subscriber is already installed.
pub fn init(log_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(10)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(log_dir)
        .context("Failed to create log file appender")?;

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Failed to create env filter")?;

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let file_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging initialized, log directory: {}", log_dir.display());
    Ok(())
}

/// Path of today's log file in `log_dir`.
pub fn current_log_path(log_dir: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    log_dir.join(format!("{LOG_PREFIX}.{today}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_log_path_is_dated() {
        let path = current_log_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("clinqc.") && name.ends_with(".log"));
        assert_eq!(name.len(), "clinqc.2024-01-01.log".len());
    }
}
