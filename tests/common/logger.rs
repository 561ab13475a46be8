//! Structured test logging.
#![allow(dead_code)]
//!
//! `TestLogger` writes one line per event to stderr (and optionally a file)
//! with the test name, phase and elapsed time, so interleaved output from
//! concurrent scheduler tests stays readable.
//!
//! # Environment Variables
//!
//! - `TEST_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_FILE` - also append lines to this file
//! - `TEST_LOG_JSON` - "1" or "true" for JSON lines

use std::env;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    test: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<&'a str>,
    elapsed_ms: u128,
}

struct Settings {
    min_level: LogLevel,
    json: bool,
    file: Option<Mutex<File>>,
}

fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| {
        let min_level = env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
            .unwrap_or(LogLevel::Info);
        let json = env::var("TEST_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let file = env::var("TEST_LOG_FILE").ok().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
                .map(Mutex::new)
        });
        Settings {
            min_level,
            json,
            file,
        }
    })
}

/// Per-test logger.
pub struct TestLogger {
    test_name: String,
    start: Instant,
    phase: Mutex<Option<String>>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let log = Self {
            test_name: test_name.to_string(),
            start: Instant::now(),
            phase: Mutex::new(None),
        };
        log.info("start");
        log
    }

    pub fn phase(&self, name: &str) {
        *self.phase.lock().unwrap() = Some(name.to_string());
        self.debug(&format!("phase: {name}"));
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn http_request(&self, method: &str, url: &str) {
        self.debug(&format!("-> {method} {url}"));
    }

    pub fn http_response(&self, status: u16, bytes: usize) {
        self.debug(&format!("<- {status} ({bytes} bytes)"));
    }

    pub fn finish_ok(&self) {
        self.info(&format!(
            "PASS in {}ms",
            self.start.elapsed().as_millis()
        ));
    }

    pub fn finish_err(&self, reason: &str) {
        self.log(
            LogLevel::Error,
            &format!("FAIL in {}ms: {reason}", self.start.elapsed().as_millis()),
        );
    }

    fn log(&self, level: LogLevel, message: &str) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self.phase.lock().unwrap().clone();
        let elapsed_ms = self.start.elapsed().as_millis();
        let timestamp = Utc::now();

        let line = if settings.json {
            let entry = LogEntry {
                timestamp,
                level,
                test: &self.test_name,
                message,
                phase: phase.as_deref(),
                elapsed_ms,
            };
            match serde_json::to_string(&entry) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            let phase = phase.map(|p| format!(" [{p}]")).unwrap_or_default();
            format!(
                "[{}] [{level}] [{}]{phase} +{elapsed_ms}ms {message}",
                timestamp.format("%H:%M:%S%.3f"),
                self.test_name
            )
        };

        eprintln!("{line}");
        if let Some(file) = &settings.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    }
}
