//! Server configuration loading from file and environment variables.
//!
//! The loaded [`Config`] is built once in `main` and handed to every
//! constructor that needs it.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "qahub_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC secret for bearer tokens. Required.
    #[serde(default)]
    pub token_secret: String,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Fully qualified methods that skip authentication.
    #[serde(default = "default_public_methods")]
    pub public_methods: Vec<String>,

    #[serde(default = "default_purge_interval_secs")]
    pub revocation_purge_interval_secs: u64,

    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Frames buffered per stream before the client counts as lagging.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,

    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub idempotency: Idempotency,
}

/// What the notification consumer does with a replayed event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    /// Insert again; the client sees a duplicate.
    #[default]
    AcceptDuplicates,
    /// Remember each event id per consumer group and insert only once.
    SuppressByEventId,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "qahub.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_ttl_secs() -> u64 {
    72 * 60 * 60
}

fn default_public_methods() -> Vec<String> {
    vec![
        "user.UserService/Login".to_string(),
        "user.UserService/Register".to_string(),
        "user.UserService/ValidateToken".to_string(),
    ]
}

fn default_purge_interval_secs() -> u64 {
    300
}

fn default_bcrypt_cost() -> u32 {
    qahub_auth::accounts::DEFAULT_BCRYPT_COST
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_batch_size() -> usize {
    100
}

fn default_client_buffer() -> usize {
    256
}

fn default_mailbox_capacity() -> usize {
    128
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            public_methods: default_public_methods(),
            revocation_purge_interval_secs: default_purge_interval_secs(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl EventsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            client_buffer: default_client_buffer(),
            mailbox_capacity: default_mailbox_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "auth.token_secret must be set (or QAHUB_TOKEN_SECRET)".into(),
            ));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("auth.token_ttl_secs must be positive".into()));
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(ConfigError::Invalid("auth.bcrypt_cost must be within 4..=31".into()));
        }
        if self.hub.client_buffer == 0 || self.hub.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.client_buffer and hub.mailbox_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults when the
/// file does not exist, then validates it.
///
/// Environment variable overrides:
/// - `QAHUB_HOST` overrides `server.host`
/// - `QAHUB_PORT` overrides `server.port`
/// - `QAHUB_DB_PATH` overrides `database.path`
/// - `QAHUB_LOG_LEVEL` overrides `logging.level`
/// - `QAHUB_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `QAHUB_TOKEN_SECRET` overrides `auth.token_secret`
/// - `QAHUB_TOKEN_TTL_SECS` overrides `auth.token_ttl_secs`
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("QAHUB_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("QAHUB_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("QAHUB_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("QAHUB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("QAHUB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(secret) = std::env::var("QAHUB_TOKEN_SECRET") {
        config.auth.token_secret = secret;
    }
    if let Ok(ttl) = std::env::var("QAHUB_TOKEN_TTL_SECS") {
        if let Ok(parsed) = ttl.parse() {
            config.auth.token_ttl_secs = parsed;
        }
    }

    config.validate()?;
    Ok(config)
}
