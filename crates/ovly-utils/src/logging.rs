//! # Logging Utilities
//!
//! Logging setup for hosts embedding the overlay engine, built on `tracing`.
//!
//! `ovly-core` only emits `tracing` events; it never installs a subscriber.
//! A host (a debugger front end, a test harness, a GDB bridge) calls one of
//! the functions here once at startup.
//!
//! - Pretty output for development, JSON for machine consumption
//! - Environment variable configuration
//! - Optional file output through a non-blocking writer
//! - A switch that turns on overlay engine debugging without touching `RUST_LOG`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ovly_utils::init_logging;
//!
//! // Keep the guard alive for as long as logs should be written
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("overlay session started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Log level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=ovly_core=trace`)
//! - `OVLY_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `OVLY_LOG_FILE`: Optional path to a log file, rotated daily
//! - `OVLY_DEBUG_OVERLAY`: When truthy (`1`, `true`, `on`, `yes`), adds an
//!   `ovly_core=debug` directive on top of whatever `RUST_LOG` says
//!
//! ## Examples
//!
//! ```rust,no_run
//! use ovly_utils::{LogFormat, LogLevel, init_logging_with_level};
//!
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Json)
//!     .expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Directive added when overlay debugging is switched on.
pub const OVERLAY_DEBUG_DIRECTIVE: &str = "ovly_core=debug";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    Pretty,
    /// JSON format
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

/// Keeps the background log writer alive.
///
/// Dropping the guard flushes and stops file output; console output is
/// unaffected.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// `true` if `value` switches a boolean environment variable on.
#[must_use]
pub fn is_truthy(value: &str) -> bool
{
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// `true` if `OVLY_DEBUG_OVERLAY` asks for overlay engine debugging.
#[must_use]
pub fn overlay_debug_enabled() -> bool
{
    env::var("OVLY_DEBUG_OVERLAY").is_ok_and(|value| is_truthy(&value))
}

/// Initialize logging with default settings
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `ovly_core=debug`)
/// - `OVLY_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `OVLY_LOG_FILE`: Optional path to log file
/// - `OVLY_DEBUG_OVERLAY`: Turn on overlay engine debugging
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `OVLY_LOG_FORMAT` is set to an unknown format
/// - File logging fails (if `OVLY_LOG_FILE` is set)
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("OVLY_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };

    // A RUST_LOG holding a plain level sets the default; anything richer is
    // picked up as a filter by `build_filter`.
    let default_level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok())
        .map_or(Level::INFO, Into::into);

    let log_file = env::var("OVLY_LOG_FILE").ok().map(PathBuf::from);
    let filter = build_filter(default_level, overlay_debug_enabled())?;
    install(format, filter, log_file.as_deref(), true)
}

/// Initialize logging with explicit level and format
///
/// `RUST_LOG`, when set, still refines the filter. `OVLY_LOG_FILE` and
/// `OVLY_DEBUG_OVERLAY` are honoured as in [`init_logging`].
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    let log_file = env::var("OVLY_LOG_FILE").ok().map(PathBuf::from);
    let filter = build_filter(level.into(), overlay_debug_enabled())?;
    install(format, filter, log_file.as_deref(), true)
}

/// Initialize logging to a dated file only, with nothing on stdout
///
/// For hosts that own the terminal (a debugger console, a TUI), where log
/// lines on stdout would corrupt the display. The file is created in `dir`
/// as `YYYY-MM-DD-ovly.log`; its path is returned with the guard.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or `dir` cannot be created.
pub fn init_logging_to_dir(dir: impl AsRef<Path>, level: Option<LogLevel>) -> Result<(PathBuf, LoggingGuard), LoggingError>
{
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let log_file = dir.join(dated_file_name());

    let default_level = level.map_or(Level::INFO, Into::into);
    let filter = build_filter(default_level, overlay_debug_enabled())?;
    let guard = install(LogFormat::Pretty, filter, Some(&log_file), false)?;
    Ok((log_file, guard))
}

/// `YYYY-MM-DD-ovly.log` for today's date in UTC.
#[must_use]
pub fn dated_file_name() -> String
{
    format!("{}-ovly.log", Utc::now().format("%Y-%m-%d"))
}

/// Build the event filter.
///
/// `RUST_LOG` takes precedence over `default_level` when it parses; the
/// overlay debug directive is added on top.
fn build_filter(default_level: Level, overlay_debug: bool) -> Result<EnvFilter, LoggingError>
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    if !overlay_debug {
        return Ok(filter);
    }
    let directive: Directive = OVERLAY_DEBUG_DIRECTIVE
        .parse()
        .map_err(|err| LoggingError::InvalidLevel(format!("{OVERLAY_DEBUG_DIRECTIVE}: {err}")))?;
    Ok(filter.add_directive(directive))
}

fn file_writer(path: &Path, daily: bool) -> (NonBlocking, WorkerGuard)
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().unwrap_or_default();
    // Dated files are already one per day.
    let appender = if daily {
        tracing_appender::rolling::daily(dir, name)
    } else {
        tracing_appender::rolling::never(dir, name)
    };
    tracing_appender::non_blocking(appender)
}

fn install(format: LogFormat, filter: EnvFilter, log_file: Option<&Path>, console: bool) -> Result<LoggingGuard, LoggingError>
{
    // `OVLY_LOG_FILE` rotates daily; an explicit dated file never does.
    let (writer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path, console);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let result = match format {
        LogFormat::Pretty => {
            let console_layer = console.then(|| {
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true)
                    .with_writer(io::stdout)
                    .with_filter(filter.clone())
            });
            let file_layer = writer.map(|writer| {
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false) // No ANSI in files
                    .with_filter(filter)
            });
            Registry::default().with(console_layer).with(file_layer).try_init()
        }
        LogFormat::Json => {
            let console_layer = console.then(|| {
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(io::stdout)
                    .with_filter(filter.clone())
            });
            let file_layer = writer.map(|writer| {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_filter(filter)
            });
            Registry::default().with(console_layer).with(file_layer).try_init()
        }
    };

    result.map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(LoggingGuard { _file: guard })
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
