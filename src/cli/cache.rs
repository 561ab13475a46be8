//! Cache command implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::{CacheCommand, OutputFormat};
use crate::error::Result;
use crate::storage::ResolvedConfig;
use crate::storage::cache::{CacheEntry, CacheStore};
use crate::util::{format_bytes, format_expiry, format_relative_time};

/// One cache entry as shown by `cache list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheListing {
    pub key: String,
    pub id: String,
    pub created: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub etag: Option<String>,
    /// Blob size, or `None` when the blob is missing.
    pub size: Option<u64>,
    pub expired: bool,
}

impl CacheListing {
    fn new(store: &CacheStore, entry: CacheEntry, now: DateTime<Utc>) -> Self {
        let size = std::fs::metadata(store.blob_path(&entry)).ok().map(|m| m.len());
        Self {
            expired: entry.is_expired_at(now),
            key: entry.key,
            id: entry.id,
            created: entry.created,
            expiry: entry.expiry,
            etag: entry.etag,
            size,
        }
    }
}

/// Execute a cache subcommand.
///
/// # Errors
///
/// Returns error if the cache directory cannot be opened or output cannot
/// be serialized.
pub fn execute(
    command: &CacheCommand,
    config: &ResolvedConfig,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    match command {
        CacheCommand::Path => {
            if format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "path": config.cache_dir }));
            } else {
                println!("{}", config.cache_dir.display());
            }
            Ok(())
        }
        CacheCommand::List => list(config, format, pretty),
    }
}

fn list(config: &ResolvedConfig, format: OutputFormat, pretty: bool) -> Result<()> {
    let store = CacheStore::open(&config.cache_dir)?;
    let now = Utc::now();
    let listings: Vec<CacheListing> = store
        .entries()
        .into_iter()
        .map(|entry| CacheListing::new(&store, entry, now))
        .collect();

    if format == OutputFormat::Json {
        let json = if pretty {
            serde_json::to_string_pretty(&listings)
        } else {
            serde_json::to_string(&listings)
        }?;
        println!("{json}");
        return Ok(());
    }

    if listings.is_empty() {
        println!("No cached responses.");
        println!("\nCache directory: {}", store.dir().display());
        return Ok(());
    }

    println!("{:<50} {:>10} {:<20} {}", "Key", "Size", "Cached", "Expiry");
    println!("{:-<50} {:->10} {:-<20} {:-<20}", "", "", "", "");
    for listing in &listings {
        let size = listing
            .size
            .map_or_else(|| "missing".to_string(), format_bytes);
        println!(
            "{:<50} {:>10} {:<20} {}",
            listing.key,
            size,
            format_relative_time(listing.created, now),
            format_expiry(listing.expiry, now)
        );
    }
    Ok(())
}
