use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SKYCACHE_CONFIG";

pub const API_KEY_ENV: &str = "VISUAL_CROSSING_API_KEY";
pub const API_URL_ENV: &str = "VISUAL_CROSSING_API_URL";
pub const UPSTREAM_TIMEOUT_ENV: &str = "UPSTREAM_TIMEOUT_SECS";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const CACHE_EXPIRATION_ENV: &str = "CACHE_EXPIRATION";
pub const CACHE_FAIL_OPEN_ENV: &str = "CACHE_FAIL_OPEN";
pub const PORT_ENV: &str = "PORT";
pub const RATE_LIMIT_ENV: &str = "RATE_LIMIT_PER_SEC";

/// 12 hours.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 43_200;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weather provider settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Cache store settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Visual Crossing API key
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the timeline endpoint; the location is appended as a path segment
    #[serde(default)]
    pub api_url: String,

    /// Overall request timeout. Unset keeps the HTTP client's defaults.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string, or `memory://` for the in-process store
    #[serde(default = "default_cache_url")]
    pub url: String,

    /// Expiration applied to every entry
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Fetch upstream when the cache store is unreachable instead of failing
    #[serde(default)]
    pub fail_open: bool,
}

fn default_cache_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            ttl_secs: default_ttl_secs(),
            fail_open: false,
        }
    }
}

impl CacheConfig {
    /// Connection string with a scheme; bare `host:port` is treated as Redis.
    pub fn connection_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Requests per second allowed per client IP (0 disables limiting)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u32 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit_per_sec: default_rate_limit(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn parse_number<T: std::str::FromStr>(raw: &str, env_name: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{env_name} must be a non-negative integer")))
}

impl Config {
    /// Load configuration from `.env`, an optional TOML file and the process environment.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let mut config = match Self::config_path()? {
            Some(path) => {
                tracing::info!("Loading config file {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Validation warnings are logged. Returns an error if a required setting
    /// is missing or validation fails.
    pub fn load_validated() -> Result<Self> {
        let config = Self::load()?;
        config.check_required()?;

        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()))
                .context("Configuration validation failed");
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Override fields from environment-style variables.
    ///
    /// `lookup` returns the raw value for a variable name, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV) {
            self.upstream.api_key = key;
        }
        if let Some(url) = lookup(API_URL_ENV) {
            self.upstream.api_url = url;
        }
        if let Some(raw) = lookup(UPSTREAM_TIMEOUT_ENV).filter(|r| !r.trim().is_empty()) {
            self.upstream.timeout_secs = Some(parse_number(&raw, UPSTREAM_TIMEOUT_ENV)?);
        }
        if let Some(url) = lookup(REDIS_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.cache.url = url;
        }
        if let Some(raw) = lookup(CACHE_EXPIRATION_ENV).filter(|r| !r.trim().is_empty()) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.cache.ttl_secs = secs,
                Err(_) => tracing::warn!(
                    "Invalid {}={:?}, keeping {} seconds",
                    CACHE_EXPIRATION_ENV,
                    raw,
                    self.cache.ttl_secs
                ),
            }
        }
        if let Some(raw) = lookup(CACHE_FAIL_OPEN_ENV) {
            self.cache.fail_open = parse_bool(&raw);
        }
        if let Some(raw) = lookup(PORT_ENV).filter(|r| !r.trim().is_empty()) {
            self.server.port = parse_number(&raw, PORT_ENV)?;
        }
        if let Some(raw) = lookup(RATE_LIMIT_ENV) {
            self.server.rate_limit_per_sec = parse_number(&raw, RATE_LIMIT_ENV)?;
        }
        Ok(())
    }

    /// Fail on settings the service cannot start without.
    pub fn check_required(&self) -> Result<(), ConfigError> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(ConfigError::MissingSetting(format!(
                "{API_KEY_ENV} must be set"
            )));
        }
        if self.upstream.api_url.trim().is_empty() {
            return Err(ConfigError::MissingSetting(format!(
                "{API_URL_ENV} must be set"
            )));
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.upstream.api_url.is_empty() {
            Self::validate_url(&self.upstream.api_url, "upstream.api_url", &mut result);
        }

        if self.upstream.timeout_secs == Some(0) {
            result.add_error("upstream.timeout_secs", "Timeout must be greater than 0");
        }

        if self.cache.ttl_secs == 0 {
            result.add_error("cache.ttl_secs", "Cache expiration must be greater than 0");
        }

        if self.cache.fail_open {
            result.add_warning(
                "cache.fail_open",
                "Cache outages will bypass the cache and hit the weather provider directly",
            );
        }

        if self.server.port == 0 {
            result.add_error("server.port", "Port cannot be 0");
        }

        if self.server.rate_limit_per_sec == 0 {
            result.add_warning("server.rate_limit_per_sec", "Rate limiting disabled");
        }

        result
    }

    fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Explicit `SKYCACHE_CONFIG`, else the per-user config file if present.
    fn config_path() -> Result<Option<PathBuf>, ConfigError> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(explicit);
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            return Ok(Some(path));
        }

        Ok(dirs::config_dir()
            .map(|dir| dir.join("skycache").join("config.toml"))
            .filter(|path| path.exists()))
    }
}
