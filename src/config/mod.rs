//! Configuration management for dvarapala
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.
//!
//! A base file may be accompanied by an environment overlay: when the
//! effective environment is `production`, `config.production.yaml` next to the
//! base file is merged over it key by key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::auth::{DEFAULT_TOKEN_TTL, DEFAULT_WORK_FACTOR};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "DVARAPALA_";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Deployment environment name (selects the overlay file)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Per-IP request rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            rate_limit: RateLimitSettings::default(),
            cors: CorsConfig::default(),
            otel: OtelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file and its environment overlay
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_file_with_environment(path, None)
    }

    /// Load configuration from a YAML file, choosing the overlay explicitly
    ///
    /// `environment` takes precedence over the `environment` key of the base
    /// file when selecting `config.<environment>.yaml`.
    pub fn from_file_with_environment<P: AsRef<Path>>(
        path: P,
        environment: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut base = read_yaml_value(path)?;

        let environment = match environment {
            Some(env) => Some(env.to_string()),
            None => base
                .get("environment")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        if let Some(env) = environment.as_deref() {
            let overlay_path = overlay_path(path, env);
            if overlay_path.is_file() {
                let overlay = read_yaml_value(&overlay_path)?;
                merge_yaml(&mut base, overlay);
            }
            if let Value::Mapping(map) = &mut base {
                map.insert(Value::from("environment"), Value::from(env));
            }
        }

        serde_yaml::from_value(base)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml)?;
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix DVARAPALA_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields from `DVARAPALA_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(environment) = env_var("ENVIRONMENT") {
            self.environment = environment;
        }

        // Server config from env
        if let Some(host) = env_var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_var("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &port)?;
        }

        // Auth config from env
        if let Some(secret) = env_var("AUTH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(ttl) = env_var("AUTH_TOKEN_TTL_SECS") {
            self.auth.token_ttl_secs = parse_env("AUTH_TOKEN_TTL_SECS", &ttl)?;
        }
        if let Some(work_factor) = env_var("AUTH_WORK_FACTOR") {
            self.auth.work_factor = parse_env("AUTH_WORK_FACTOR", &work_factor)?;
        }

        // Database config from env
        if let Some(path) = env_var("DATABASE_PATH") {
            self.database.path = path;
        }

        // Logging config from env
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = env_var("LOG_DIR") {
            self.logging.dir = Some(dir);
        }

        // OTEL config from env
        if let Some(enabled) = env_var("OTEL_ENABLED") {
            self.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            self.otel.endpoint = Some(endpoint);
        }

        Ok(())
    }

    /// Check values that deserialize fine but cannot run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("auth.jwt_secret".to_string()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.token_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.auth.work_factor == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.work_factor must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limit.window_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_environment() -> String {
    "development".to_string()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

/// Authentication configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// HMAC secret used to sign identity tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Token lifetime in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Argon2 iteration count for new password digests
    #[serde(default = "default_work_factor")]
    pub work_factor: u32,
}

impl AuthConfig {
    /// Token lifetime
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("work_factor", &self.work_factor)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
            work_factor: default_work_factor(),
        }
    }
}

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL.as_secs()
}

fn default_work_factor() -> u32 {
    DEFAULT_WORK_FACTOR
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "dvarapala.db".to_string()
}

/// Per-IP fixed-window rate limit settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    /// Whether rate limiting is enabled
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Requests allowed per window and client IP
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_requests_per_window() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "dvarapala".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for the `api.log` file; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn parse_env<T: std::str::FromStr>(suffix: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}{}", ENV_PREFIX, suffix)))
}

fn read_yaml_value(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::FileRead(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let expanded = expand_env_vars(&content)?;
    let value: Value = serde_yaml::from_str(&expanded)
        .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;

    // An empty file parses as null
    Ok(match value {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    })
}

/// `config.yaml` + `staging` -> `config.staging.yaml` in the same directory
fn overlay_path(base: &Path, environment: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config");
    let extension = base
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("yaml");
    base.with_file_name(format!("{}.{}.{}", stem, environment, extension))
}

/// Recursively merge `overlay` into `base`; overlay scalars and sequences win
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax; unknown variables are left as written.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Parse(format!("Invalid expansion pattern: {}", e)))?;

    Ok(re
        .replace_all(input, |caps: &regex_lite::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned())
}
