use std::path::Path;

use crate::parse::{ConfigError, parse_config};
use crate::route::RouteConfig;
use crate::validation::{ConfigReport, validate};

// =======================================================
// PER-IP ADMISSION LIMITS + DEFAULTS
// =======================================================
#[derive(Debug, Clone)]
pub struct IpLimitConfig {
    pub max_conn_per_ip: u32,
    pub rps_limit: u32,
    pub burst_limit: u32,
    pub cleanup_interval_secs: u64,
}

impl Default for IpLimitConfig {
    fn default() -> Self {
        Self {
            max_conn_per_ip: 10,
            rps_limit: 10,
            burst_limit: 20,
            cleanup_interval_secs: 60,
        }
    }
}

// =======================================================
// FILE CACHE LIMITS + DEFAULTS
// =======================================================
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Largest single file the cache will hold.
    pub max_file_bytes: u64,
    /// Total resident byte cap across all entries.
    pub max_total_bytes: u64,
    /// How often the background sweeper runs.
    pub cleanup_interval_secs: u64,
    /// Entries untouched for this long are evicted by the sweeper.
    pub idle_expiry_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
            max_total_bytes: 100 * 1024 * 1024,
            cleanup_interval_secs: 300,
            idle_expiry_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub path: String,
    pub level: String,
    pub daily: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: "logs".into(),
            level: "info".into(),
            daily: true,
        }
    }
}

// =======================================================
// SERVER CONFIG: the record a worker serves from.
// Immutable once the worker starts.
// =======================================================
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workers: u16,
    pub listen_port: u16,
    pub max_connections: u32,
    pub keepalive_secs: u32,
    pub max_body_bytes: u64,

    /// Ordered route table. First match is longest-prefix, not file order.
    pub routes: Vec<RouteConfig>,

    // Timeouts (seconds)
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,

    pub memory_pool_bytes: u64,

    /// Connections drained per accept-readiness burst.
    pub accept_batch: usize,
    /// Maintenance tick period.
    pub tick_millis: u64,

    pub limits: IpLimitConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,

    /// Companion credential file for OAuth-protected routes.
    pub credentials_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            listen_port: 8080,
            max_connections: 1024,
            keepalive_secs: 65,
            max_body_bytes: 10 * 1024 * 1024,
            routes: Vec::new(),
            read_timeout_secs: 10,
            write_timeout_secs: 10,
            idle_timeout_secs: 5,
            memory_pool_bytes: 16 * 1024 * 1024,
            accept_batch: 100,
            tick_millis: 1000,
            limits: IpLimitConfig::default(),
            cache: CacheConfig::default(),
            log: LogConfig::default(),
            credentials_file: "config/api_auth.conf".into(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }

    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        parse_config(text, &mut cfg)?;
        Ok(cfg)
    }

    /// Validate the configuration and return a report of warnings and errors.
    pub fn validate(&self) -> ConfigReport {
        validate(self)
    }
}
