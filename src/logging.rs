//! Logging setup for transpool.
//!
//! Logs always go to stderr: stdout carries gateway replies in `run` and the
//! IPC stream in `worker`.
//!
//! # Environment Variables
//!
//! - `TRANSPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `TRANSPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `TRANSPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `TRANSPOOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use transpool::logging::{LogConfig, init};
//!
//! init(LogConfig::default().with_env_overrides());
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Env var carrying the effective filter down to worker processes.
pub const LOG_FILTER_ENV: &str = "TRANSPOOL_LOG";

/// Env var enabling file output.
pub const LOG_FILE_ENV: &str = "TRANSPOOL_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Path to a daily-rotated log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: true)
    pub show_target: bool,
    /// Show thread names; worker threads are named after their core
    pub show_thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
            show_target: true,
            show_thread_names: true,
        }
    }
}

impl LogConfig {
    /// Preset for `transpool worker` subprocesses.
    ///
    /// Compact and quieter by default; the parent forwards its filter
    /// through [`LOG_FILTER_ENV`].
    pub fn for_worker() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            show_target: false,
            ..Self::default()
        }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log file path.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Set a custom filter string.
    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// CLI arguments take precedence: once a filter is set (from -v or
    /// --log-level), `TRANSPOOL_LOG`, `RUST_LOG` and `TRANSPOOL_LOG_LEVEL`
    /// are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("TRANSPOOL_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("TRANSPOOL_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var(LOG_FILE_ENV) {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    /// The filter directive in effect, for handing to child processes.
    pub fn effective_filter(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None => self.level.to_string().to_lowercase(),
        }
    }

    /// Build the EnvFilter for this configuration.
    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// One formatting layer writing to `writer`.
fn format_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(config.show_target)
            .with_thread_names(config.show_thread_names)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(config.show_target)
            .with_thread_names(config.show_thread_names)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(config.show_target)
            .with_thread_names(config.show_thread_names)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Writes to stderr, and also to `config.file_path` when set. Call once at
/// startup; later calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let mut layers: Vec<BoxedLayer> = vec![format_layer(&config, std::io::stderr, true)];

    if let Some(path) = config.file_path.as_ref() {
        let parent = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("transpool.log");
        let appender = RollingFileAppender::new(Rotation::DAILY, parent, file_name);
        layers.push(format_layer(&config, appender, false));
    }

    // Silently ignore if already initialized (idempotent)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();
}
