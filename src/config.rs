//! Configuration management for the guild roster service.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! environment variables prefixed with `GUILD_` using `__` between nested
//! keys, e.g. `GUILD_RATE_LIMITING__REQUESTS_PER_WINDOW=120`.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RosterError};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "GUILD";

/// Main configuration for the guild roster service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Counter store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// What the request pipeline does when the counter store is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Reject the request with an internal error
    #[default]
    Closed,
    /// Let the request through unlimited
    Open,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum requests per client per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Upper bound on each counter store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`
    #[serde(default = "default_trust_forwarded_headers")]
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            failure_policy: FailurePolicy::default(),
            trust_forwarded_headers: default_trust_forwarded_headers(),
        }
    }
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_requests_per_window() -> u64 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_trust_forwarded_headers() -> bool {
    true
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// `host:port` of the Redis server
    #[serde(default = "default_redis_addr")]
    pub addr: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub db: i64,

    /// Time allowed for the initial connection and ping
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            password: String::new(),
            db: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RedisConfig {
    /// Connection settings for the Redis client.
    ///
    /// Built field by field rather than as a URL, so passwords containing
    /// URL-reserved characters are passed through untouched.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        let invalid = || RosterError::Config(format!("redis.addr must be host:port, got {:?}", self.addr));

        let (host, port) = self.addr.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: (!self.password.is_empty()).then(|| self.password.clone()),
                ..RedisConnectionInfo::default()
            },
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_redis_addr() -> String {
    "redis:6379".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Counter store backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance
    #[default]
    Redis,
    /// In-process map, for single-instance deployments
    Memory,
}

/// Counter store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl RosterConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .map_err(|e| RosterError::Config(e.to_string()))?;
        Self::finish(settings)
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let settings = builder
            .add_source(env)
            .build()
            .map_err(|e| RosterError::Config(e.to_string()))?;
        Self::finish(settings)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: RosterConfig = settings
            .try_deserialize()
            .map_err(|e| RosterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the rate limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.requests_per_window == 0 {
            return Err(RosterError::Config(
                "rate_limiting.requests_per_window must be greater than zero".to_string(),
            ));
        }
        if rl.window_secs == 0 {
            return Err(RosterError::Config(
                "rate_limiting.window_secs must be greater than zero".to_string(),
            ));
        }
        if rl.store_timeout_ms == 0 {
            return Err(RosterError::Config(
                "rate_limiting.store_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.redis.connect_timeout_secs == 0 {
            return Err(RosterError::Config(
                "redis.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
