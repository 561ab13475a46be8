//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/fetchq/config.toml`
//! - macOS: `~/Library/Application Support/fetchq/config.toml`
//! - Windows: `%APPDATA%/fetchq/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `FETCHQ_CONFIG`: Override config file path
//! - `FETCHQ_MAX_INFLIGHT`: Concurrent requests allowed per category
//! - `FETCHQ_CACHE_DIR`: Response cache directory
//! - `FETCHQ_TIMEOUT`: Request timeout in seconds
//!
//! All values are read once at startup; nothing here is reloaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::download::DEFAULT_BUFFER_BUDGET;
use crate::core::scheduler::DEFAULT_MAX_INFLIGHT_PER_CATEGORY;
use crate::error::{FetchqError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "FETCHQ_CONFIG";
/// Environment variable for the per-category concurrency limit.
pub const ENV_MAX_INFLIGHT: &str = "FETCHQ_MAX_INFLIGHT";
/// Environment variable for the cache directory.
pub const ENV_CACHE_DIR: &str = "FETCHQ_CACHE_DIR";
/// Environment variable for timeout in seconds.
pub const ENV_TIMEOUT: &str = "FETCHQ_TIMEOUT";

/// Largest accepted request timeout.
pub const MAX_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub max_inflight: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Concurrent requests allowed per category.
    pub max_inflight_per_category: usize,
    /// Response cache directory.
    pub cache_dir: PathBuf,
    /// Largest body buffered for caching, in bytes.
    pub buffer_budget: usize,
    /// Expiry for responses without `max-age` or `Expires`.
    pub default_ttl: Duration,
    /// Request timeout.
    pub timeout: Duration,
    /// `User-Agent` override.
    pub user_agent: Option<String>,
    /// Config file that was consulted (it may not exist).
    pub config_path: PathBuf,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub max_inflight_per_category: ConfigSource,
    pub cache_dir: ConfigSource,
    pub buffer_budget: ConfigSource,
    pub default_ttl: ConfigSource,
    pub timeout: ConfigSource,
    pub user_agent: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI values, environment variables,
    /// and the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An explicitly named config file is missing
    /// - The config file exists but is invalid
    /// - Any resolved value is invalid
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    /// [`resolve`](Self::resolve) with an explicit environment lookup.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_with(
        overrides: &ConfigOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (config_path, explicit) = match (&overrides.config_path, env(ENV_CONFIG)) {
            (Some(path), _) => (path.clone(), true),
            (None, Some(path)) => (PathBuf::from(path), true),
            (None, None) => (Config::config_path(), false),
        };

        if explicit && !config_path.exists() {
            return Err(FetchqError::ConfigNotFound {
                path: config_path.display().to_string(),
            });
        }

        let config = Config::load_from(&config_path)?;
        config.validate()?;
        Self::merge(overrides, &config, config_path, &env)
    }

    fn merge(
        overrides: &ConfigOverrides,
        config: &Config,
        config_path: PathBuf,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut sources = ConfigSources::default();

        let max_inflight_per_category = Self::resolve_max_inflight(
            overrides,
            config,
            env,
            &mut sources.max_inflight_per_category,
        )?;
        let cache_dir = Self::resolve_cache_dir(overrides, config, env, &mut sources.cache_dir);
        let timeout = Self::resolve_timeout(overrides, config, env, &mut sources.timeout)?;

        sources.buffer_budget =
            file_or_default(config.cache.buffer_budget != DEFAULT_BUFFER_BUDGET);
        sources.default_ttl = file_or_default(
            config.cache.default_ttl_seconds != CacheConfig::default().default_ttl_seconds,
        );
        sources.user_agent = file_or_default(config.http.user_agent.is_some());

        Ok(Self {
            max_inflight_per_category,
            cache_dir,
            buffer_budget: config.cache.buffer_budget,
            default_ttl: Duration::from_secs(config.cache.default_ttl_seconds),
            timeout,
            user_agent: config.http.user_agent.clone(),
            config_path,
            sources,
        })
    }

    fn resolve_max_inflight(
        overrides: &ConfigOverrides,
        config: &Config,
        env: &impl Fn(&str) -> Option<String>,
        source: &mut ConfigSource,
    ) -> Result<usize> {
        // 1. CLI flag
        if let Some(max) = overrides.max_inflight {
            *source = ConfigSource::Cli;
            return validate_max_inflight(max);
        }

        // 2. Environment variable
        if let Some(value) = env(ENV_MAX_INFLIGHT) {
            *source = ConfigSource::Env;
            let max = value.trim().parse::<usize>().map_err(|_| FetchqError::ConfigInvalid {
                key: ENV_MAX_INFLIGHT.to_string(),
                value: value.clone(),
                message: "expected a positive integer".to_string(),
            })?;
            return validate_max_inflight(max);
        }

        // 3. Config file, or its default
        *source = file_or_default(
            config.scheduler.max_inflight_per_category != DEFAULT_MAX_INFLIGHT_PER_CATEGORY,
        );
        Ok(config.scheduler.max_inflight_per_category)
    }

    fn resolve_cache_dir(
        overrides: &ConfigOverrides,
        config: &Config,
        env: &impl Fn(&str) -> Option<String>,
        source: &mut ConfigSource,
    ) -> PathBuf {
        if let Some(dir) = &overrides.cache_dir {
            *source = ConfigSource::Cli;
            return dir.clone();
        }

        if let Some(dir) = env(ENV_CACHE_DIR).filter(|d| !d.is_empty()) {
            *source = ConfigSource::Env;
            return PathBuf::from(dir);
        }

        if let Some(dir) = &config.cache.directory {
            *source = ConfigSource::ConfigFile;
            return dir.clone();
        }

        *source = ConfigSource::Default;
        AppPaths::new().http_cache_dir()
    }

    fn resolve_timeout(
        overrides: &ConfigOverrides,
        config: &Config,
        env: &impl Fn(&str) -> Option<String>,
        source: &mut ConfigSource,
    ) -> Result<Duration> {
        if let Some(secs) = overrides.timeout_seconds {
            *source = ConfigSource::Cli;
            return validate_timeout(secs).map(Duration::from_secs);
        }

        // Unparseable values are ignored
        if let Some(secs) = env(ENV_TIMEOUT).and_then(|v| v.trim().parse::<u64>().ok()) {
            *source = ConfigSource::Env;
            return validate_timeout(secs).map(Duration::from_secs);
        }

        *source =
            file_or_default(config.http.timeout_seconds != HttpConfig::default().timeout_seconds);
        Ok(Duration::from_secs(config.http.timeout_seconds))
    }
}

const fn file_or_default(from_file: bool) -> ConfigSource {
    if from_file {
        ConfigSource::ConfigFile
    } else {
        ConfigSource::Default
    }
}

fn validate_max_inflight(max: usize) -> Result<usize> {
    if max == 0 {
        return Err(FetchqError::ConfigInvalid {
            key: "max_inflight_per_category".to_string(),
            value: max.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(max)
}

fn validate_timeout(secs: u64) -> Result<u64> {
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(FetchqError::ConfigInvalid {
            key: "timeout_seconds".to_string(),
            value: secs.to_string(),
            message: format!("Timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"),
        });
    }
    Ok(secs)
}

// =============================================================================
// Config file
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
}

/// Request scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrent requests allowed per category.
    pub max_inflight_per_category: usize,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory. Defaults to the platform cache location.
    pub directory: Option<PathBuf>,
    /// Largest body buffered for caching, in bytes.
    pub buffer_budget: usize,
    /// Expiry for responses without `max-age` or `Expires`.
    pub default_ttl_seconds: u64,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// `User-Agent` override.
    pub user_agent: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_category: DEFAULT_MAX_INFLIGHT_PER_CATEGORY,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            default_ttl_seconds: crate::core::cache_policy::DEFAULT_TTL.as_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: crate::core::http::DEFAULT_TIMEOUT.as_secs(),
            user_agent: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| FetchqError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for a zero concurrency limit or buffer
    /// budget, or a timeout outside 1-300 seconds.
    pub fn validate(&self) -> Result<()> {
        validate_max_inflight(self.scheduler.max_inflight_per_category)?;

        if self.cache.buffer_budget == 0 {
            return Err(FetchqError::ConfigInvalid {
                key: "cache.buffer_budget".to_string(),
                value: "0".to_string(),
                message: "must be at least 1 byte".to_string(),
            });
        }

        validate_timeout(self.http.timeout_seconds)?;
        Ok(())
    }
}
