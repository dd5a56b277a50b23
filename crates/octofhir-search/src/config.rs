//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the search engine and its binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.search.default_count == 0 {
            return Err("search.default_count must be > 0".into());
        }
        if self.search.max_count == 0 {
            return Err("search.max_count must be > 0".into());
        }
        if self.search.default_count > self.search.max_count {
            return Err("search.default_count must be <= search.max_count".into());
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err("cache.max_entries must be > 0 when the cache is enabled".into());
        }
        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// What to do with a typed query value that cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedValuePolicy {
    /// Drop the value with a warning; a parameter left with no values is dropped.
    #[default]
    Drop,
    /// Fail the whole query with a client error.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Page size when `_count` is absent
    #[serde(default = "default_count")]
    pub default_count: u32,
    /// Upper bound `_count` is clamped to
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    #[serde(default)]
    pub malformed_values: MalformedValuePolicy,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_count: default_count(),
            max_count: default_max_count(),
            malformed_values: MalformedValuePolicy::default(),
        }
    }
}

fn default_count() -> u32 {
    10
}

fn default_max_count() -> u32 {
    100
}

/// Local result cache tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    300
}

/// Optional shared Redis tier of the result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Prefix of every key this engine writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// How long the tier is skipped after a failure
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
            key_prefix: default_key_prefix(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_key_prefix() -> String {
    "octofhir:search".to_string()
}

fn default_retry_after_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub mod loader {
    use super::EngineConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-search.toml";

    /// Load configuration from an optional TOML file plus `OCTOFHIR_SEARCH__*` overrides.
    ///
    /// Without an explicit path, `octofhir-search.toml` in the working directory is used if
    /// it exists. An explicit path that does not exist is an error.
    pub fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // e.g. OCTOFHIR_SEARCH__CACHE__TTL_SECS=60
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_SEARCH")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: EngineConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.default_count, 10);
        assert_eq!(config.search.max_count, 100);
        assert_eq!(config.search.malformed_values, MalformedValuePolicy::Drop);
        assert!(config.cache.enabled);
        assert!(!config.redis.enabled);
    }

    #[test]
    fn test_validation_rejects_inverted_counts() {
        let mut config = EngineConfig::default();
        config.search.default_count = 500;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[search]\nmax_count = 50\nmalformed_values = \"reject\"\n\n[cache]\nttl_secs = 5"
        )
        .unwrap();

        let config = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(config.search.max_count, 50);
        assert_eq!(config.search.default_count, 10);
        assert_eq!(config.search.malformed_values, MalformedValuePolicy::Reject);
        assert_eq!(config.cache.ttl_secs, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(loader::load_config(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let rendered = EngineConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[search]"));
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cache.max_entries, 1_000);
    }
}
