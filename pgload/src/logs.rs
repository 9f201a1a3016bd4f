//! Logging setup and progress helpers.
//!
//! Everything goes through `tracing`. The console layer writes to stderr; an
//! optional file layer appends plain-text lines to the configured log file.
//! The `log_*` helpers give pipeline progress a uniform look on both.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Progress message level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn marker(self) -> &'static str {
        match self {
            LogLevel::Info => "",
            LogLevel::Success => "✓ ",
            LogLevel::Warning => "⚠ ",
            LogLevel::Error => "✗ ",
        }
    }
}

/// Render a progress line with its marker and indentation.
pub fn format_entry(level: LogLevel, message: &str, indent: u8) -> String {
    format!("{}{}{}", "   ".repeat(indent as usize), level.marker(), message)
}

/// Emit a progress line at the matching tracing level.
pub fn log(level: LogLevel, message: &str, indent: u8) {
    let line = format_entry(level, message, indent);
    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", line),
        LogLevel::Warning => tracing::warn!("{}", line),
        LogLevel::Error => tracing::error!("{}", line),
    }
}

pub fn log_info(msg: impl AsRef<str>) {
    log(LogLevel::Info, msg.as_ref(), 0);
}

pub fn log_success(msg: impl AsRef<str>) {
    log(LogLevel::Success, msg.as_ref(), 0);
}

pub fn log_warning(msg: impl AsRef<str>) {
    log(LogLevel::Warning, msg.as_ref(), 0);
}

pub fn log_error(msg: impl AsRef<str>) {
    log(LogLevel::Error, msg.as_ref(), 0);
}

pub fn log_info_indent(msg: impl AsRef<str>, indent: u8) {
    log(LogLevel::Info, msg.as_ref(), indent);
}

pub fn log_error_indent(msg: impl AsRef<str>, indent: u8) {
    log(LogLevel::Error, msg.as_ref(), indent);
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(level: Option<&str>, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level.unwrap_or("info") };
    format!("pgload={}", level)
}

/// Install the global subscriber.
///
/// Returns the file writer guard when a log file is configured; it must be
/// held until the program exits so buffered lines are flushed.
pub fn init_logging(file: Option<&Path>, level: Option<&str>, verbose: bool) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level, verbose)));

    let console_layer = fmt::layer().with_target(false).with_writer(io::stderr);

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("'{}' is not a file path", path.display()))
            })?;
            std::fs::create_dir_all(dir)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(name.to_string_lossy())
                .build(dir)
                .map_err(io::Error::other)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_target(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(guard)
}
