//! # Logging Utilities
//!
//! `tracing` subscriber setup for the rosdbg binaries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rosdbg_utils::init_logging;
//!
//! // Keep the guard alive for as long as logs should be flushed to file
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("Debugger started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter (e.g. `debug`, `rosdbg_core=trace`)
//! - `ROSDBG_LOG_FORMAT`: `pretty` (default) or `json`
//! - `ROSDBG_LOG_FILE`: also write to this file, rotated daily
//!
//! The terminal UI cannot share stdout with log output, so it uses
//! [`init_logging_for_tui`], which writes only to a dated file under `~/.rosdbg`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "ROSDBG_LOG_FORMAT";
/// Environment variable naming an extra log file.
pub const LOG_FILE_ENV: &str = "ROSDBG_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable (default)
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "text" => Ok(LogFormat::Pretty),
            "json" | "prod" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    /// Includes every frame read from the target
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
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Dropping it flushes and stops file logging.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize console logging configured from the environment.
///
/// ## Errors
///
/// [`LoggingError::InvalidFormat`] for a bad `ROSDBG_LOG_FORMAT`, or
/// [`LoggingError::InitializationFailed`] if a subscriber is already installed.
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    install_console(format, None)
}

/// Initialize console logging at `level`, ignoring `RUST_LOG`.
///
/// ## Errors
///
/// As for [`init_logging`].
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    install_console(format, Some(level.into()))
}

/// Initialize file-only logging for the terminal UI.
///
/// Logs go to `~/.rosdbg/YYYY-MM-DD-rosdbg-tui.log` (or the system temp
/// directory without a home). Returns the file path and the writer guard.
///
/// ## Errors
///
/// [`LoggingError::FileError`] if the directory cannot be created, or
/// [`LoggingError::InitializationFailed`] if a subscriber is already installed.
pub fn init_logging_for_tui(level: Option<LogLevel>) -> Result<(PathBuf, LogGuard), LoggingError>
{
    let dir = log_directory();
    std::fs::create_dir_all(&dir)?;
    let today = Utc::now().format("%Y-%m-%d");
    let log_file = dir.join(format!("{today}-rosdbg-tui.log"));

    // The date is already in the name, so no rotation
    let appender = tracing_appender::rolling::never(&dir, log_file.file_name().unwrap_or_default());
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = layer(LogFormat::Pretty, writer, false, filter(level.map(Into::into)));

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok((log_file, LogGuard { _file: Some(guard) }))
}

/// `~/.rosdbg`, falling back to the temp directory.
#[must_use]
pub fn log_directory() -> PathBuf
{
    dirs::home_dir().map_or_else(env::temp_dir, |home| home.join(".rosdbg"))
}

fn install_console(format: LogFormat, level: Option<Level>) -> Result<LogGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = vec![layer(format, io::stdout, true, filter(level))];
    let mut guard = None;

    if let Some(path) = env::var_os(LOG_FILE_ENV).map(PathBuf::from) {
        let (dir, name) = split_log_path(&path);
        let appender = tracing_appender::rolling::daily(dir, name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(layer(format, writer, false, filter(level)));
        guard = Some(file_guard);
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(LogGuard { _file: guard })
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf)
{
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let name = path
        .file_name()
        .map_or_else(|| PathBuf::from("rosdbg.log"), PathBuf::from);
    (dir, name)
}

/// Explicit level wins, then `RUST_LOG`, then `info`.
fn filter(level: Option<Level>) -> EnvFilter
{
    match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug' or 'trace'")]
    InvalidLevel(String),

    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!(matches!("xml".parse::<LogFormat>(), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!(matches!("loud".parse::<LogLevel>(), Err(LoggingError::InvalidLevel(_))));
        assert!(LogLevel::Trace > LogLevel::Info);
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
    }

    #[test]
    fn test_split_log_path()
    {
        let (dir, name) = split_log_path(Path::new("/var/log/rosdbg.log"));
        assert_eq!(dir, PathBuf::from("/var/log"));
        assert_eq!(name, PathBuf::from("rosdbg.log"));

        let (dir, name) = split_log_path(Path::new("session.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, PathBuf::from("session.log"));
    }
}
