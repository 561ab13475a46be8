//! Application paths for config and cache.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
}

impl AppPaths {
    /// Create paths for the fetchq application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "fetchq") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            Self {
                config: home.join(".config/fetchq"),
                cache: home.join(".cache/fetchq"),
            }
        }
    }

    /// Path to the default config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Default directory of the HTTP response cache.
    #[must_use]
    pub fn http_cache_dir(&self) -> PathBuf {
        self.cache.join("http-cache")
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_is_under_app_cache() {
        let paths = AppPaths::new();
        assert!(paths.http_cache_dir().starts_with(&paths.cache));
        assert!(paths.http_cache_dir().ends_with("http-cache"));
        assert!(paths.config_file().ends_with("config.toml"));
    }
}
