//! Tracing subscriber setup: optional console output plus an optional
//! rolling log file. `RUST_LOG` overrides the configured level.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::{LogLevel, LogRotation, LoggingFileConfig};

/// Filter used when `RUST_LOG` is unset: our crates at `level`, everything
/// else at warn (or error, if that is quieter).
pub fn default_directive(level: LogLevel) -> String {
    let ours = level.as_directive();
    let others = match level {
        LogLevel::Error | LogLevel::Critical => "error",
        _ => "warn",
    };
    format!("fmo_relay={ours},fmo_header={ours},{others}")
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Never => Rotation::NEVER,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
    }
}

fn file_appender(config: &LoggingFileConfig) -> Result<RollingFileAppender> {
    let path = Path::new(&config.file);
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid log file path: {}", config.file))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(file_name);
    if config.backup_count > 0 {
        builder = builder.max_log_files(config.backup_count);
    }
    builder
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", config.file))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init(config: &LoggingFileConfig, level: LogLevel) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let console_layer = config.console.then(tracing_subscriber::fmt::layer);

    let (file_layer, guard) = if config.file.is_empty() {
        (None, None)
    } else {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(config)?);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
