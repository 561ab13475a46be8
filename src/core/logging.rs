//! Diagnostic logging to stderr or a file.
//!
//! Library code only emits `tracing` events; the binary installs the
//! subscriber through [`init`].

use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "FETCHQ_LOG";
pub const LOG_FORMAT_ENV: &str = "FETCHQ_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "FETCHQ_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log level from CLI argument or environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse log level from `FETCHQ_LOG`.
#[must_use]
pub fn parse_log_level_from_env() -> Option<LogLevel> {
    non_empty(std::env::var(LOG_LEVEL_ENV).ok()).and_then(|v| LogLevel::from_arg(&v))
}

/// Parse log format from `FETCHQ_LOG_FORMAT`.
#[must_use]
pub fn parse_log_format_from_env() -> Option<LogFormat> {
    non_empty(std::env::var(LOG_FORMAT_ENV).ok()).and_then(|v| LogFormat::from_arg(&v))
}

/// Parse log file path from `FETCHQ_LOG_FILE`.
#[must_use]
pub fn parse_log_file_from_env() -> Option<PathBuf> {
    non_empty(std::env::var(LOG_FILE_ENV).ok()).map(PathBuf::from)
}

/// Filter directive for `level`, scoped to this crate.
#[must_use]
pub fn filter_directive(level: LogLevel) -> String {
    format!("fetchq={}", level.as_filter())
}

/// Install the global subscriber.
///
/// `verbose` raises the default level to debug. `RUST_LOG`, when set,
/// replaces the computed filter. An unopenable log file falls back to
/// stderr.
pub fn init(level: LogLevel, format: LogFormat, log_file: Option<PathBuf>, verbose: bool) {
    let level = if verbose && matches!(level, LogLevel::Warn | LogLevel::Error) {
        LogLevel::Debug
    } else {
        level
    };

    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
    });

    let writer = if let Some(file) = file {
        BoxMakeWriter::new(file)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match format {
        LogFormat::Json => {
            builder
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            builder.compact().with_target(true).try_init().ok();
        }
        LogFormat::Human => {
            builder.with_target(false).without_time().try_init().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_accepts_aliases() {
        assert_eq!(LogLevel::from_arg("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_arg("verbose"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_arg("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_arg("loud"), None);
        assert_eq!(LogLevel::Info.as_tracing_level(), Level::INFO);
    }

    #[test]
    fn format_parsing() {
        assert_eq!(LogFormat::from_arg("Json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_arg("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::from_arg("xml"), None);
    }

    #[test]
    fn filter_is_scoped_to_crate() {
        assert_eq!(filter_directive(LogLevel::Debug), "fetchq=debug");
        assert_eq!(filter_directive(LogLevel::default()), "fetchq=warn");
    }

    #[test]
    fn blank_values_are_ignored() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" json ".to_string())).as_deref(), Some("json"));
        assert_eq!(non_empty(None), None);
    }
}
