//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::scheduler::{NO_CATEGORY, RequestFlags};
use crate::error::{FetchqError, Result};
use crate::storage::ConfigOverrides;

/// fetchq - scheduled, cached HTTP fetches.
#[derive(Parser, Debug)]
#[command(name = "fetchq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Response cache directory
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Concurrent requests allowed per category
    #[arg(long, value_name = "N", global = true)]
    pub max_inflight: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub const fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }

    /// Configuration values given on the command line.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            max_inflight: self.max_inflight,
            cache_dir: self.cache_dir.clone(),
            timeout_seconds: self.timeout,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one or more URLs through the scheduler
    Get(GetArgs),

    /// Inspect the response cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Show the resolved configuration and where each value came from
    Config,
}

/// Arguments for the `get` command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// URLs to fetch
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Concurrency category for these requests
    #[arg(long, value_name = "NAME")]
    pub category: Option<String>,

    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Serve from and store into the response cache
    #[arg(long)]
    pub cache: bool,

    /// Write the body to a file instead of stdout (single URL only)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl GetArgs {
    /// Validate argument combinations.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for `--output` with several URLs, an empty
    /// category, or a malformed header.
    pub fn validate(&self) -> Result<()> {
        if self.output.is_some() && self.urls.len() > 1 {
            return Err(FetchqError::InvalidRequest(
                "--output requires a single URL".to_string(),
            ));
        }
        if self.category.as_deref() == Some("") {
            return Err(FetchqError::InvalidRequest(
                "--category must not be empty".to_string(),
            ));
        }
        self.parsed_headers().map(|_| ())
    }

    #[must_use]
    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or(NO_CATEGORY)
    }

    /// `CACHE_RESPONSE` with `--cache`, otherwise `RETURN_STREAM`.
    #[must_use]
    pub const fn flags(&self) -> RequestFlags {
        if self.cache {
            RequestFlags::CACHE_RESPONSE
        } else {
            RequestFlags::RETURN_STREAM
        }
    }

    /// Parse `-H` values into name/value pairs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a header without a colon or name.
    pub fn parsed_headers(&self) -> Result<Vec<(String, String)>> {
        self.headers.iter().map(|raw| parse_header(raw)).collect()
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| FetchqError::InvalidRequest(format!("header '{raw}' is missing ':'")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(FetchqError::InvalidRequest(format!(
            "header '{raw}' has no name"
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cached entries
    List,

    /// Print the cache directory
    Path,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn get_args(argv: &[&str]) -> GetArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(Commands::Get(args)) => args,
            other => panic!("expected get, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn get_defaults_to_stream_in_default_category() {
        let args = get_args(&["fetchq", "get", "https://example.com"]);
        assert_eq!(args.flags(), RequestFlags::RETURN_STREAM);
        assert_eq!(args.category(), NO_CATEGORY);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn get_with_cache_and_headers() {
        let args = get_args(&[
            "fetchq",
            "get",
            "--cache",
            "--category",
            "images",
            "-H",
            "Accept: image/png",
            "-H",
            "X-Trace:abc",
            "https://example.com/a.png",
        ]);
        assert_eq!(args.flags(), RequestFlags::CACHE_RESPONSE);
        assert_eq!(args.category(), "images");
        assert_eq!(
            args.parsed_headers().unwrap(),
            vec![
                ("Accept".to_string(), "image/png".to_string()),
                ("X-Trace".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn get_validation_errors() {
        let args = get_args(&["fetchq", "get", "-o", "out.bin", "https://a", "https://b"]);
        assert!(args.validate().is_err());

        let args = get_args(&["fetchq", "get", "-H", "no-colon", "https://a"]);
        assert!(matches!(args.validate(), Err(FetchqError::InvalidRequest(_))));

        let args = get_args(&["fetchq", "get", "-H", ": value", "https://a"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn global_overrides_are_collected() {
        let cli = Cli::try_parse_from([
            "fetchq",
            "--max-inflight",
            "2",
            "--timeout",
            "9",
            "--cache-dir",
            "/tmp/c",
            "cache",
            "path",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.max_inflight, Some(2));
        assert_eq!(overrides.timeout_seconds, Some(9));
        assert_eq!(overrides.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(cli.command, Some(Commands::Cache(CacheCommand::Path))));
    }

    #[test]
    fn json_flag_sets_format() {
        let cli = Cli::try_parse_from(["fetchq", "--json", "config"]).unwrap();
        assert_eq!(cli.effective_format(), OutputFormat::Json);
    }
}
