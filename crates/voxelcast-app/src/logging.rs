//! Console and rotating-file logging.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Prefix of every log file name.
pub const LOG_FILE_PREFIX: &str = "voxelcast";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. When file output is on,
/// the returned guard must be held until exit so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log filter {:?}", config.level))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = if config.file_output {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(config)?);
        let layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    if config.file_output {
        let max_age = Duration::from_secs(config.max_age_days * SECONDS_PER_DAY);
        match prune_stale_logs(&config.directory, LOG_FILE_PREFIX, max_age) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Removed {removed} stale log files"),
            Err(e) => tracing::warn!("Could not prune old logs: {e}"),
        }
    }

    Ok(guard)
}

fn file_appender(config: &LoggingConfig) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("Failed to create log directory {}", config.directory.display())
    })?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&config.directory)
        .context("Failed to create rolling log file")
}

/// Delete files in `dir` whose name starts with `prefix` and that were last
/// modified more than `max_age` ago. Returns how many were removed.
pub fn prune_stale_logs(dir: &Path, prefix: &str, max_age: Duration) -> std::io::Result<usize> {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(0);
    };

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let is_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if is_log && metadata.modified()? < cutoff {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}
