//! Config command implementation.

use serde_json::{Value, json};

use crate::cli::args::OutputFormat;
use crate::error::Result;
use crate::storage::{ConfigSource, ResolvedConfig};
use crate::util::format_bytes;

/// Print the resolved configuration with the source of each value.
///
/// # Errors
///
/// Returns error if JSON output cannot be serialized.
pub fn execute(config: &ResolvedConfig, format: OutputFormat, pretty: bool) -> Result<()> {
    let sources = &config.sources;

    if format == OutputFormat::Json {
        let value = json!({
            "configPath": config.config_path,
            "maxInflightPerCategory": sourced(
                json!(config.max_inflight_per_category),
                sources.max_inflight_per_category,
            ),
            "cacheDir": sourced(json!(config.cache_dir), sources.cache_dir),
            "bufferBudget": sourced(json!(config.buffer_budget), sources.buffer_budget),
            "defaultTtlSeconds": sourced(json!(config.default_ttl.as_secs()), sources.default_ttl),
            "timeoutSeconds": sourced(json!(config.timeout.as_secs()), sources.timeout),
            "userAgent": sourced(json!(config.user_agent), sources.user_agent),
        });
        let out = if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }?;
        println!("{out}");
        return Ok(());
    }

    let exists = if config.config_path.exists() { "" } else { " (not found)" };
    println!("Config file: {}{exists}", config.config_path.display());
    println!();
    let rows = [
        (
            "max_inflight_per_category",
            config.max_inflight_per_category.to_string(),
            sources.max_inflight_per_category,
        ),
        ("cache_dir", config.cache_dir.display().to_string(), sources.cache_dir),
        ("buffer_budget", format_bytes(config.buffer_budget as u64), sources.buffer_budget),
        ("default_ttl", format!("{}s", config.default_ttl.as_secs()), sources.default_ttl),
        ("timeout", format!("{}s", config.timeout.as_secs()), sources.timeout),
        (
            "user_agent",
            config.user_agent.clone().unwrap_or_else(|| "(built-in)".to_string()),
            sources.user_agent,
        ),
    ];
    for (name, value, source) in rows {
        println!("{name:<28} {value:<40} [{source}]");
    }
    Ok(())
}

fn sourced(value: Value, source: ConfigSource) -> Value {
    json!({ "value": value, "source": source.to_string() })
}
