//! Storage for configuration and cached responses.

pub mod cache;
pub mod config;
pub mod paths;

pub use cache::{CacheEntry, CacheStore};
pub use config::{
    Config, ConfigOverrides, ConfigSource, ConfigSources, ResolvedConfig, ENV_CACHE_DIR,
    ENV_CONFIG, ENV_MAX_INFLIGHT, ENV_TIMEOUT,
};
pub use paths::AppPaths;
