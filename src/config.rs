//! Configuration for the demo servers.
//!
//! The framework core consumes no CLI arguments, environment variables or
//! files; this module belongs to the binaries. Settings come from
//! command-line arguments merged over an optional TOML file, CLI taking
//! precedence.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments shared by the demo servers.
#[derive(Parser, Debug)]
#[command(name = "skyline")]
#[command(version = "1.0.0")]
#[command(about = "Reactor-based network server", long_about = None)]
pub struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g. 0.0.0.0:8889)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of sub-reactor threads (0 = single loop, capped at CPU count)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Serve multiple requests per connection
    #[arg(short = 'k', long)]
    pub keepalive: bool,

    /// Idle timeout in milliseconds before a quiet connection is closed
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub keepalive: bool,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            keepalive: false,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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
    "0.0.0.0:8889".to_string()
}

fn default_idle_timeout_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub keepalive: bool,
    pub idle_timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Parse the process CLI and merge it over the optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref path) = cli.config {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            keepalive: cli.keepalive || toml_config.server.keepalive,
            idle_timeout_ms: cli
                .idle_timeout_ms
                .unwrap_or(toml_config.server.idle_timeout_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8889");
        assert_eq!(config.server.workers, 0);
        assert!(!config.server.keepalive);
        assert_eq!(config.server.idle_timeout_ms, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:8080"
            workers = 4
            keepalive = true
            idle_timeout_ms = 1000

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.server.workers, 4);
        assert!(config.server.keepalive);
        assert_eq!(config.server.idle_timeout_ms, 1000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml_defaults() {
        let cli = CliArgs {
            config: None,
            listen: Some("127.0.0.1:9000".to_string()),
            workers: Some(2),
            keepalive: true,
            idle_timeout_ms: None,
            log_level: "warn".to_string(),
        };
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.workers, 2);
        assert!(config.keepalive);
        assert_eq!(config.idle_timeout_ms, 500);
        assert_eq!(config.log_level, "warn");
    }
}
