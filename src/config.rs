use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{BrokerError, Result};

/// Fallback for `ENCRYPTION_KEY`; accepted so local setups start, but logged loudly.
pub const DEFAULT_ENCRYPTION_KEY: &str = "default-key-change-in-production";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider adapter runtime configuration
    pub broker: BrokerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Provider secret encryption
    pub crypto: CryptoConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Echo-my-IP endpoint used to validate proxies
    pub validation_url: String,
    /// Default vendor API timeout in seconds (default: 30)
    pub provider_timeout: u64,
    /// Timeout for proxy validation / health checks in seconds (default: 10)
    pub health_check_timeout: u64,
    /// Interval between full provider reloads in seconds (0 = disabled)
    pub reload_interval: u64,
    /// Minimum pool size each adapter is topped up to
    pub pool_min_size: usize,
    /// Interval between pool top-ups in seconds (0 = disabled)
    pub pool_refresh_interval: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            validation_url: "https://api.ipify.org?format=json".to_string(),
            provider_timeout: 30,
            health_check_timeout: 10,
            reload_interval: 300,
            pool_min_size: 100,
            pool_refresh_interval: 60,
        }
    }
}

impl BrokerConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout.max(1))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Operator secret the provider config key is derived from
    pub encryption_key: String,
}

impl CryptoConfig {
    pub fn is_default_key(&self) -> bool {
        self.encryption_key == DEFAULT_ENCRYPTION_KEY
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = BrokerConfig::default();

        Ok(Config {
            broker: BrokerConfig {
                validation_url: parse_validation_url()?,
                provider_timeout: parse_or("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout)?,
                health_check_timeout: parse_or(
                    "HEALTH_CHECK_TIMEOUT_SECS",
                    defaults.health_check_timeout,
                )?,
                reload_interval: parse_or("PROVIDER_RELOAD_INTERVAL_SECS", defaults.reload_interval)?,
                pool_min_size: parse_or("POOL_MIN_SIZE", defaults.pool_min_size)?,
                pool_refresh_interval: parse_or(
                    "POOL_REFRESH_INTERVAL_SECS",
                    defaults.pool_refresh_interval,
                )?,
            },
            database: DatabaseConfig {
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    BrokerError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "broker"),
                password: get_env_or("DB_PASSWORD", "broker_password"),
                name: get_env_or("DB_NAME", "proxy_service"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: get_env_or("DB_MAX_CONNECTIONS", "10")
                    .parse()
                    .map_err(|_| {
                        BrokerError::InvalidConfig("DB_MAX_CONNECTIONS must be a valid number".into())
                    })?,
                min_connections: get_env_or("DB_MIN_CONNECTIONS", "1").parse().map_err(|_| {
                    BrokerError::InvalidConfig("DB_MIN_CONNECTIONS must be a valid number".into())
                })?,
            },
            crypto: CryptoConfig {
                encryption_key: get_env_or("ENCRYPTION_KEY", DEFAULT_ENCRYPTION_KEY),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }
}

fn parse_validation_url() -> Result<String> {
    let raw = get_env_or("VALIDATION_URL", "");
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(BrokerConfig::default().validation_url);
    }

    let url = Url::parse(raw).map_err(|e| {
        BrokerError::InvalidConfig(format!("VALIDATION_URL must be a valid URL: {}", e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(BrokerError::InvalidConfig(format!(
            "VALIDATION_URL has unsupported scheme: {}",
            other
        ))),
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| BrokerError::InvalidConfig(format!("{} must be a valid number", key))),
        _ => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
