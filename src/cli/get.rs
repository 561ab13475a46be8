//! Get command implementation.

use std::path::Path;

use futures::future::join_all;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::cli::args::{GetArgs, OutputFormat};
use crate::core::body::BodySource;
use crate::core::client::FetchClient;
use crate::error::{FetchqError, Result};
use crate::util::format_bytes;

/// Outcome of one URL, as reported in JSON output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

const fn source_name(source: BodySource) -> &'static str {
    match source {
        BodySource::Network => "network",
        BodySource::Downloaded => "downloaded",
        BodySource::Cache => "cache",
    }
}

/// Execute the get command.
///
/// Bodies go to stdout (or `--output`) in human mode; JSON mode prints one
/// report per URL instead. Ctrl-C cancels every request still pending.
///
/// # Errors
///
/// Returns the first failed request's error after all have finished.
pub async fn execute(
    args: &GetArgs,
    client: &FetchClient,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    args.validate()?;
    let headers = args.parsed_headers()?;
    let flags = args.flags();
    let category = args.category().to_string();

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Interrupted, cancelling requests");
                cancel.cancel();
            }
        })
    };

    tracing::debug!(urls = args.urls.len(), %category, ?flags, "Starting fetch");

    let fetches = args.urls.iter().map(|uri| {
        let token = cancel.child_token();
        let headers = headers.clone();
        let category = category.clone();
        async move {
            let outcome = match client
                .fetch_with_category(uri.as_str(), category, headers, token, flags)
                .await
            {
                Ok(body) => {
                    let source = body.source();
                    body.bytes().await.map(|bytes| (source, bytes))
                }
                Err(e) => Err(e),
            };
            (uri.clone(), outcome)
        }
    });
    let results = join_all(fetches).await;
    interrupt.abort();

    let mut reports = Vec::with_capacity(results.len());
    let mut first_error: Option<FetchqError> = None;

    for (uri, outcome) in results {
        match outcome {
            Ok((source, bytes)) => {
                if format == OutputFormat::Human {
                    write_body(args.output.as_deref(), &bytes).await?;
                    let size = format_bytes(bytes.len() as u64);
                    eprintln!("{uri}: {size} ({})", source_name(source));
                }
                reports.push(FetchReport {
                    uri,
                    source: Some(source_name(source)),
                    bytes: Some(bytes.len() as u64),
                    error: None,
                    error_code: None,
                });
            }
            Err(e) => {
                if format == OutputFormat::Human && e.is_user_visible() {
                    eprintln!("{uri}: {e}");
                }
                reports.push(FetchReport {
                    uri,
                    source: None,
                    bytes: None,
                    error: Some(e.to_string()),
                    error_code: Some(e.error_code()),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    if format == OutputFormat::Json {
        let json = if pretty {
            serde_json::to_string_pretty(&reports)
        } else {
            serde_json::to_string(&reports)
        }?;
        println!("{json}");
    }

    first_error.map_or(Ok(()), Err)
}

async fn write_body(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    if let Some(path) = output {
        tokio::fs::write(path, bytes).await?;
    } else {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(bytes).await?;
        stdout.flush().await?;
    }
    Ok(())
}
