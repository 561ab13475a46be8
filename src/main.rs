//! fetchq - scheduled, cached HTTP fetches.
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use fetchq::cli::{Cli, Commands, OutputFormat};
use fetchq::core::client::{ClientConfig, FetchClient};
use fetchq::core::logging;
use fetchq::error::FetchqError;
use fetchq::storage::ResolvedConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = cli
        .log_level
        .as_deref()
        .and_then(logging::LogLevel::from_arg)
        .or_else(logging::parse_log_level_from_env)
        .unwrap_or_default();
    let log_format = if cli.json_output {
        logging::LogFormat::Json
    } else {
        logging::parse_log_format_from_env().unwrap_or_default()
    };
    let log_file = logging::parse_log_file_from_env();
    logging::init(log_level, log_format, log_file, cli.verbose);

    let format = cli.effective_format();
    let pretty = cli.pretty;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{e}");
            report_error(&e, format, pretty);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> fetchq::Result<()> {
    let format = cli.effective_format();
    let pretty = cli.pretty;

    let Some(command) = cli.command.as_ref() else {
        print_quickstart();
        return Ok(());
    };

    let config = ResolvedConfig::resolve(&cli.overrides())?;

    match command {
        Commands::Get(args) => {
            let client = FetchClient::from_config(&ClientConfig::from(&config))?;
            let result = fetchq::cli::get::execute(args, &client, format, pretty).await;
            let persisted = client.shutdown().await;
            result.and(persisted)
        }
        Commands::Cache(cmd) => fetchq::cli::cache::execute(cmd, &config, format, pretty),
        Commands::Config => fetchq::cli::config::execute(&config, format, pretty),
    }
}

fn report_error(e: &FetchqError, format: OutputFormat, pretty: bool) {
    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "error": {
                "code": e.error_code(),
                "category": e.category().to_string(),
                "message": e.to_string(),
            }
        });
        let out = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        if let Ok(out) = out {
            eprintln!("{out}");
        }
    } else if e.is_user_visible() {
        eprintln!("error[{}]: {e}", e.error_code());
    }
}

/// Print quickstart help when no command is given.
fn print_quickstart() {
    println!(
        r"fetchq - scheduled, cached HTTP fetches

USAGE:
    fetchq [OPTIONS] <COMMAND>

COMMANDS:
    get      Fetch one or more URLs through the scheduler
    cache    Inspect the response cache
    config   Show the resolved configuration

QUICK START:
    fetchq get https://example.com                  # Stream a body to stdout
    fetchq get --cache https://example.com/logo.png # Serve from or fill the cache
    fetchq get --category images URL1 URL2 URL3     # Share one concurrency budget
    fetchq cache list                               # Show cached responses

For more help: fetchq --help
"
    );
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
}
