//! # Configuration Module
//!
//! Construction-time options for the cache layer.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support
//! - Validation that reports every problem at once

use crate::caching::filter::MAX_FILTER_BITS;
use crate::core::error::{CacheError, CacheResult};
use crate::routing::{RoutePattern, RouteRule};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main cache layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key-value store connection
    pub redis: RedisConfig,

    /// Prefix prepended to every cache key
    pub prefix: String,

    /// Default expiry for cached entries
    #[serde(with = "humantime_serde")]
    pub expire: Duration,

    /// Inclusion rules, evaluated in order
    pub routes: Vec<RouteRule>,

    /// Exclusion patterns, checked after inclusion
    pub exclude: Vec<String>,

    /// Query parameter that forces passthrough when present
    pub pass_param: Option<String>,

    /// Largest body (in bytes) that will be written to the store
    pub max_length: Option<usize>,

    /// Membership filter sizing and namespace
    pub bloom: BloomConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            prefix: "bloom-cache:".to_string(),
            expire: Duration::from_secs(30 * 60),
            routes: vec![RouteRule::Pattern("(.*)".to_string())],
            exclude: Vec::new(),
            pass_param: None,
            max_length: None,
            bloom: BloomConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: CacheConfig = serde_yaml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: CacheConfig = serde_json::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Variables follow the pattern `BLOOM_CACHE_<FIELD>`,
    /// for example `BLOOM_CACHE_EXPIRE=10m`.
    pub fn apply_env_overrides(&mut self) -> CacheResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> CacheResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BLOOM_CACHE_REDIS_URL") {
            self.redis.url = Some(url);
        }

        if let Some(prefix) = lookup("BLOOM_CACHE_PREFIX") {
            self.prefix = prefix;
        }

        if let Some(expire) = lookup("BLOOM_CACHE_EXPIRE") {
            self.expire = humantime::parse_duration(&expire)
                .map_err(|e| CacheError::config(format!("Invalid BLOOM_CACHE_EXPIRE: {}", e)))?;
        }

        if let Some(max_length) = lookup("BLOOM_CACHE_MAX_LENGTH") {
            self.max_length = Some(max_length.parse().map_err(|e| {
                CacheError::config(format!("Invalid BLOOM_CACHE_MAX_LENGTH: {}", e))
            })?);
        }

        if let Some(param) = lookup("BLOOM_CACHE_PASS_PARAM") {
            self.pass_param = Some(param).filter(|p| !p.is_empty());
        }

        if let Some(level) = lookup("BLOOM_CACHE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("BLOOM_CACHE_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> CacheResult<()> {
        let mut errors = Vec::new();

        if self.expire.is_zero() {
            errors.push("expire must be greater than 0".to_string());
        }

        if let Err(e) = Url::parse(&self.redis.connection_url()) {
            errors.push(format!("Invalid redis url '{}': {}", self.redis.connection_url(), e));
        }

        if self.redis.health_check_interval.is_zero() {
            errors.push("redis.health_check_interval must be greater than 0".to_string());
        }

        if self.redis.client.connection_timeout.is_zero() {
            errors.push("redis.client.connection_timeout must be greater than 0".to_string());
        }

        if self.redis.client.response_timeout.is_zero() {
            errors.push("redis.client.response_timeout must be greater than 0".to_string());
        }

        if self.bloom.size == 0 {
            errors.push("bloom.size must be greater than 0".to_string());
        } else if self.bloom.size > MAX_FILTER_BITS {
            errors.push(format!(
                "bloom.size must be at most {} (Redis bitmap limit)",
                MAX_FILTER_BITS
            ));
        }

        if self.bloom.hashes == 0 {
            errors.push("bloom.hashes must be greater than 0".to_string());
        }

        if self.bloom.prefix.is_empty() {
            errors.push("bloom.prefix cannot be empty".to_string());
        }

        for rule in &self.routes {
            if let Some(ttl) = rule.ttl() {
                if ttl.is_zero() {
                    errors.push(format!("Route '{}' has a zero expire", rule.pattern()));
                }
            }
            if let Err(e) = RoutePattern::compile(rule.pattern()) {
                errors.push(e.to_string());
            }
        }

        for pattern in &self.exclude {
            if let Err(e) = RoutePattern::compile(pattern) {
                errors.push(e.to_string());
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(CacheError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Server host, used when no url is given
    pub host: String,

    /// Server port, used when no url is given
    pub port: u16,

    /// Full connection URL; overrides host and port
    pub url: Option<String>,

    /// How often the connection monitor pings the server
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Options handed to the Redis client
    pub client: RedisClientOptions,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            url: None,
            health_check_interval: Duration::from_secs(5),
            client: RedisClientOptions::default(),
        }
    }
}

/// Redis client options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisClientOptions {
    /// Limit on establishing a connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Limit on a single command round trip
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Reconnect attempts made by the connection manager after a drop
    pub retries: usize,

    /// Reconnect backoff: `rand(0 .. factor * base^attempt)` milliseconds
    pub backoff_base: u64,
    pub backoff_factor: u64,
}

impl Default for RedisClientOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(1),
            retries: 6,
            backoff_base: 2,
            backoff_factor: 100,
        }
    }
}

impl RedisConfig {
    /// Effective connection URL
    pub fn connection_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("redis://{}:{}/", self.host, self.port))
    }
}

/// Membership filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Bit-array size per namespace
    pub size: u64,

    /// Number of hash functions
    pub hashes: u32,

    /// Base key; namespaces are addressed as `prefix:namespace`
    pub prefix: String,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            size: 256,
            hashes: 16,
            prefix: "bloom-filter".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.prefix, "bloom-cache:");
        assert_eq!(config.expire, Duration::from_secs(1800));
        assert_eq!(config.redis.connection_url(), "redis://localhost:6379/");
        assert_eq!(config.bloom.size, 256);
        assert_eq!(config.bloom.hashes, 16);
        assert_eq!(config.bloom.prefix, "bloom-filter");
        assert!(config.max_length.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_url_overrides_host_and_port() {
        let redis = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            ..Default::default()
        };
        assert_eq!(redis.connection_url(), "redis://cache.internal:6380/");

        let redis = RedisConfig {
            url: Some("redis://other:7000/2".to_string()),
            ..redis
        };
        assert_eq!(redis.connection_url(), "redis://other:7000/2");
    }

    #[test]
    fn test_yaml_with_mixed_routes() {
        let yaml = r#"
prefix: "tenant-cache:"
expire: 10s
routes:
  - /index
  - path: /articles/:id
    expire: 1m
exclude:
  - /articles/draft
pass_param: nocache
max_length: 1024
bloom:
  size: 1024
  hashes: 4
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.prefix, "tenant-cache:");
        assert_eq!(config.expire, Duration::from_secs(10));
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].ttl(), None);
        assert_eq!(config.routes[1].pattern(), "/articles/:id");
        assert_eq!(config.routes[1].ttl(), Some(Duration::from_secs(60)));
        assert_eq!(config.pass_param.as_deref(), Some("nocache"));
        assert_eq!(config.max_length, Some(1024));
        assert_eq!(config.bloom.prefix, "bloom-filter");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = CacheConfig {
            expire: Duration::ZERO,
            exclude: vec!["/broken/(".to_string()],
            bloom: BloomConfig {
                size: 0,
                hashes: 0,
                prefix: String::new(),
            },
            ..Default::default()
        };

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("expire must be greater than 0"));
        assert!(message.contains("bloom.size"));
        assert!(message.contains("bloom.hashes"));
        assert!(message.contains("bloom.prefix"));
        assert!(message.contains("/broken/("));
    }

    #[test]
    fn test_bloom_size_is_bounded() {
        let mut config = CacheConfig::default();

        config.bloom.size = MAX_FILTER_BITS;
        assert!(config.validate().is_ok());

        config.bloom.size = MAX_FILTER_BITS + 1;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("bloom.size must be at most"));

        config.bloom.size = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_client_options() {
        let yaml = r#"
redis:
  url: "redis://cache:6379/1"
  client:
    connection_timeout: 2s
    response_timeout: 250ms
    retries: 3
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        let client = &config.redis.client;
        assert_eq!(client.connection_timeout, Duration::from_secs(2));
        assert_eq!(client.response_timeout, Duration::from_millis(250));
        assert_eq!(client.retries, 3);
        assert_eq!(client.backoff_base, 2);
        assert!(config.validate().is_ok());

        let mut config = config;
        config.redis.client.response_timeout = Duration::ZERO;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("redis.client.response_timeout"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BLOOM_CACHE_REDIS_URL", "redis://env-host:6390/"),
            ("BLOOM_CACHE_EXPIRE", "90s"),
            ("BLOOM_CACHE_MAX_LENGTH", "2048"),
            ("BLOOM_CACHE_PASS_PARAM", "fresh"),
        ]
        .into_iter()
        .collect();

        let mut config = CacheConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.redis.connection_url(), "redis://env-host:6390/");
        assert_eq!(config.expire, Duration::from_secs(90));
        assert_eq!(config.max_length, Some(2048));
        assert_eq!(config.pass_param.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = CacheConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "BLOOM_CACHE_MAX_LENGTH").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prefix: \"file-cache:\"\nexpire: 5m\nexclude: [\"/admin(.*)\"]").unwrap();

        let config = CacheConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.prefix, "file-cache:");
        assert_eq!(config.expire, Duration::from_secs(300));
        assert_eq!(config.exclude, vec!["/admin(.*)".to_string()]);
    }

    #[tokio::test]
    async fn test_load_from_json_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"bloom": {{"hashes": 0}}}}"#).unwrap();

        let result = CacheConfig::load_from_json(file.path()).await;
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }
}
