//! Server configuration
//!
//! Configuration is loaded from environment variables, falling back to the
//! defaults below.

use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    pub port: u16,
    /// Root directory of published experiments
    pub data_dir: PathBuf,
    /// Base tile size the pyramids and tile queries are computed with
    pub tile_size: u32,
    pub cache: CacheConfig,
    /// Directory of the viewer's static files, served as fallback
    pub static_files_dir: Option<PathBuf>,
}

/// In-memory cache limits
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum size of the encoded tile cache in megabytes
    pub tile_cache_max_mb: u64,
    /// Maximum number of experiment indexes kept loaded
    pub max_cached_experiments: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("/var/lib/cellmap/experiments"),
            tile_size: 256,
            cache: CacheConfig::default(),
            static_files_dir: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tile_cache_max_mb: 256,
            max_cached_experiments: 8,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(dir) = env::var("DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(val) = env::var("TILE_SIZE")
            && let Ok(size) = val.parse::<u32>()
        {
            if size >= 16 && size.is_power_of_two() {
                config.tile_size = size;
            } else {
                tracing::warn!("Ignoring TILE_SIZE={}: not a power of two >= 16", size);
            }
        }

        if let Ok(val) = env::var("TILE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse()
        {
            config.cache.tile_cache_max_mb = mb;
        }
        if let Ok(val) = env::var("MAX_CACHED_EXPERIMENTS")
            && let Ok(n) = val.parse()
        {
            config.cache.max_cached_experiments = n;
        }

        if let Ok(dir) = env::var("STATIC_FILES_DIR")
            && !dir.is_empty()
        {
            config.static_files_dir = Some(PathBuf::from(dir));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.cache.max_cached_experiments, 8);
        assert!(config.static_files_dir.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // No variables are set in tests, so defaults apply
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
    }
}
