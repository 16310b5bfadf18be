//! Structured logging setup with console and file output.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! - Interactive terminal: stderr only
//! - Otherwise: daily rotating file plus stderr at INFO and above
//! - File setup failure falls back to stderr only
//! - Filter priority: explicit filter > `DBCOMM_LOG` > `RUST_LOG` > build default

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "DBCOMM_LOG";

/// Log file name prefix.
const LOG_FILE_PREFIX: &str = "dbcomm";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Whether stderr is an interactive terminal
    pub is_pty: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir, is_pty: atty::is(atty::Stream::Stderr), log_filter: None }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Guard that must be held for the lifetime of the application.
///
/// Dropping this guard flushes pending log entries.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Initialize logging with the given configuration.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.is_pty {
        return init_console_logging(config.log_filter.as_deref());
    }

    match init_file_logging(&config) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {e}. Using console only.");
            init_console_logging(config.log_filter.as_deref())
        }
    }
}

/// Initialize with defaults.
pub fn init_logging_default() -> LoggingGuard {
    init_logging(LogConfig::new(log_dir()))
}

fn init_console_logging(filter: Option<&str>) -> LoggingGuard {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_env_filter(filter))
        .with_ansi(true)
        .with_target(false)
        .init();

    LoggingGuard { _worker_guard: None }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&config.log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr = std::io::stderr.with_max_level(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_writer(stderr.and(non_blocking))
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}

fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Default log filter for the build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,dbcomm=debug,dbcomm_core=debug,mongodb=warn,russh=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "warn,dbcomm=info,dbcomm_core=info,mongodb=warn,russh=warn"
    }
}

/// Default log directory: `<data dir>/dbcomm/logs`, or `./logs` when the
/// platform has no data directory.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("dbcomm"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
}
