//! Configuration module for the linecache server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. Every tunable
//! the core consumes is a fixed constant resolved here: the core never
//! computes its own limits.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the cache server
#[derive(Parser, Debug)]
#[command(name = "linecache-server")]
#[command(version = "0.1.0")]
#[command(about = "An in-memory sharded key-value server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of cache shards
    #[arg(short = 's', long)]
    pub shards: Option<usize>,

    /// Number of protocol worker threads
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of protocol worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-connection outbound queue capacity, in buffers
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// Per-connection read buffer size in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Readiness wait timeout in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: default_workers(),
            write_queue_capacity: default_write_queue_capacity(),
            read_buffer_size: default_read_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Cache-related configuration
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    /// Number of independent shards
    #[serde(default = "default_shards")]
    pub shards: usize,
    /// Maximum key length in bytes
    #[serde(default = "default_max_key_size")]
    pub max_key_size: usize,
    /// Maximum value length in bytes
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            max_key_size: default_max_key_size(),
            max_value_size: default_max_value_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_shards() -> usize {
    8
}

fn default_write_queue_capacity() -> usize {
    100
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_max_key_size() -> usize {
    4
}

fn default_max_value_size() -> usize {
    2096
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub shards: usize,
    pub workers: usize,
    pub write_queue_capacity: usize,
    pub read_buffer_size: usize,
    pub poll_timeout_ms: u64,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shards: default_shards(),
            workers: default_workers(),
            write_queue_capacity: default_write_queue_capacity(),
            read_buffer_size: default_read_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_key_size: default_max_key_size(),
            max_value_size: default_max_value_size(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            shards: cli.shards.unwrap_or(toml_config.cache.shards),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            write_queue_capacity: toml_config.server.write_queue_capacity,
            read_buffer_size: toml_config.server.read_buffer_size,
            poll_timeout_ms: toml_config.server.poll_timeout_ms,
            max_key_size: toml_config.cache.max_key_size,
            max_value_size: toml_config.cache.max_value_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:9090");
        assert_eq!(config.shards, 8);
        assert_eq!(config.workers, 10);
        assert_eq!(config.write_queue_capacity, 100);
        assert_eq!(config.max_key_size, 4);
        assert_eq!(config.max_value_size, 2096);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9090"
            workers = 4
            write_queue_capacity = 50

            [cache]
            shards = 16
            max_key_size = 64

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9090");
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.write_queue_capacity, 50);
        assert_eq!(config.cache.shards, 16);
        assert_eq!(config.cache.max_key_size, 64);
        // Unset keys fall back to defaults
        assert_eq!(config.cache.max_value_size, 2096);
        assert_eq!(config.logging.level, "debug");
    }
}
