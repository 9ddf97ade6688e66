//! Configuration module for Ephimail.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{EphimailError, Result};

/// SMTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Host address to bind.
    #[serde(default = "default_smtp_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Hostname announced in the greeting and HELO replies.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Recipient domains accepted by the server.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Read deadline in seconds for each client line.
    #[serde(default = "default_smtp_timeout")]
    pub read_timeout_secs: u64,
    /// Write deadline in seconds for each reply.
    #[serde(default = "default_smtp_timeout")]
    pub write_timeout_secs: u64,
    /// Maximum accepted message size in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Maximum number of recipients per transaction.
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_smtp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_smtp_timeout() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

fn default_max_recipients() -> usize {
    50
}

fn default_max_connections() -> usize {
    100
}

impl SmtpConfig {
    /// Read deadline as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            hostname: default_hostname(),
            allowed_domains: vec![],
            read_timeout_secs: default_smtp_timeout(),
            write_timeout_secs: default_smtp_timeout(),
            max_message_bytes: default_max_message_bytes(),
            max_recipients: default_max_recipients(),
            max_connections: default_max_connections(),
        }
    }
}

/// Web server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Host address to bind.
    #[serde(default = "default_web_host")]
    pub host: String,
    /// Port number for the web API.
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// CORS allowed origins (empty = any origin).
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Path to the frontend build directory.
    #[serde(default = "default_static_path")]
    pub static_path: String,
    /// Public backend URL handed to the frontend (empty = derived from the request).
    #[serde(default)]
    pub backend_url: String,
    /// Whether the reservation API is enabled.
    #[serde(default)]
    pub reservations_enabled: bool,
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    80
}

fn default_static_path() -> String {
    "frontend/dist".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            cors_origins: vec![],
            static_path: default_static_path(),
            backend_url: String::new(),
            reservations_enabled: false,
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Redis server.
    Redis,
    /// Process-local map, lost on restart.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend to use.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Redis host.
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    /// Redis port.
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Email time-to-live in hours (0 = no expiry).
    #[serde(default = "default_email_ttl")]
    pub email_ttl_hours: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Redis
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_email_ttl() -> u64 {
    24
}

impl StorageConfig {
    /// Redis connection URL.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/0", self.redis_host, self.redis_port)
    }

    /// Email TTL as a [`Duration`]; zero means no expiry.
    pub fn email_ttl(&self) -> Duration {
        Duration::from_secs(self.email_ttl_hours * 3600)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            email_ttl_hours: default_email_ttl(),
        }
    }
}

/// Event hub and viewer connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of each viewer's outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Keepalive ping interval in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Seconds without inbound traffic before a viewer is dropped.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    /// Write deadline in seconds per frame.
    #[serde(default = "default_hub_write_timeout")]
    pub write_timeout_secs: u64,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54
}

fn default_pong_timeout() -> u64 {
    60
}

fn default_hub_write_timeout() -> u64 {
    10
}

fn default_max_frame_bytes() -> usize {
    512
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            write_timeout_secs: default_hub_write_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/ephimail.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// SMTP server configuration.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Web server configuration.
    #[serde(default)]
    pub web: WebConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Event hub configuration.
    #[serde(default)]
    pub hub: HubConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(EphimailError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EphimailError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `REDIS_ADDRESS`, `REDIS_PORT`
    /// - `MAIL_ADDRESS`, `MAIL_PORT`, `ALLOWED_DOMAINS` (comma-separated)
    /// - `WEB_ADDRESS`, `WEB_PORT`, `BACKEND_URL`
    /// - `EMAIL_TTL` (hours, 0 for no expiration)
    ///
    /// Empty or unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("REDIS_ADDRESS") {
            self.storage.redis_host = v;
        }
        if let Some(v) = env_parse("REDIS_PORT") {
            self.storage.redis_port = v;
        }
        if let Some(v) = env_string("MAIL_ADDRESS") {
            self.smtp.host = v;
        }
        if let Some(v) = env_parse("MAIL_PORT") {
            self.smtp.port = v;
        }
        if let Some(v) = env_string("ALLOWED_DOMAINS") {
            self.smtp.allowed_domains = split_list(&v);
        }
        if let Some(v) = env_string("WEB_ADDRESS") {
            self.web.host = v;
        }
        if let Some(v) = env_parse("WEB_PORT") {
            self.web.port = v;
        }
        if let Some(v) = env_string("BACKEND_URL") {
            self.web.backend_url = v;
        }
        if let Some(v) = env_parse("EMAIL_TTL") {
            self.storage.email_ttl_hours = v;
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - No recipient domain is allowed
    /// - The viewer queue capacity is zero
    pub fn validate(&self) -> Result<()> {
        if self.smtp.allowed_domains.is_empty() {
            return Err(EphimailError::Validation(
                "smtp.allowed_domains is empty. \
                 Set it in config.toml or via ALLOWED_DOMAINS environment variable."
                    .to_string(),
            ));
        }
        if self.hub.queue_capacity == 0 {
            return Err(EphimailError::Validation(
                "hub.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

/// Split a comma-separated list, dropping blank items.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.smtp.host, "127.0.0.1");
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.hostname, "localhost");
        assert!(config.smtp.allowed_domains.is_empty());
        assert_eq!(config.smtp.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.smtp.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.smtp.max_message_bytes, 1024 * 1024);
        assert_eq!(config.smtp.max_recipients, 50);

        assert_eq!(config.web.host, "127.0.0.1");
        assert_eq!(config.web.port, 80);
        assert!(config.web.cors_origins.is_empty());
        assert_eq!(config.web.static_path, "frontend/dist");
        assert!(!config.web.reservations_enabled);

        assert_eq!(config.storage.backend, StorageBackend::Redis);
        assert_eq!(config.storage.redis_url(), "redis://127.0.0.1:6379/0");
        assert_eq!(config.storage.email_ttl(), Duration::from_secs(24 * 3600));

        assert_eq!(config.hub.queue_capacity, 256);
        assert_eq!(config.hub.ping_interval_secs, 54);
        assert_eq!(config.hub.pong_timeout_secs, 60);
        assert_eq!(config.hub.write_timeout_secs, 10);
        assert_eq!(config.hub.max_frame_bytes, 512);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/ephimail.log");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[smtp]
host = "0.0.0.0"
port = 2525
hostname = "mx.example.com"
allowed_domains = ["example.com", "example.org"]
read_timeout_secs = 5
write_timeout_secs = 7
max_message_bytes = 2048
max_recipients = 3

[web]
host = "0.0.0.0"
port = 8080
cors_origins = ["http://localhost:5173"]
static_path = "public"
backend_url = "https://mail.example.com"
reservations_enabled = true

[storage]
backend = "memory"
redis_host = "redis"
redis_port = 6380
email_ttl_hours = 0

[hub]
queue_capacity = 8

[logging]
level = "debug"
file = "custom/app.log"
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.smtp.host, "0.0.0.0");
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.hostname, "mx.example.com");
        assert_eq!(config.smtp.allowed_domains, vec!["example.com", "example.org"]);
        assert_eq!(config.smtp.read_timeout_secs, 5);
        assert_eq!(config.smtp.write_timeout_secs, 7);
        assert_eq!(config.smtp.max_message_bytes, 2048);
        assert_eq!(config.smtp.max_recipients, 3);

        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.web.static_path, "public");
        assert_eq!(config.web.backend_url, "https://mail.example.com");
        assert!(config.web.reservations_enabled);

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.redis_url(), "redis://redis:6380/0");
        assert_eq!(config.storage.email_ttl(), Duration::ZERO);

        assert_eq!(config.hub.queue_capacity, 8);
        // Unspecified values keep their defaults
        assert_eq!(config.hub.ping_interval_secs, 54);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "custom/app.log");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.storage.email_ttl_hours, 24);
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");
        match result {
            Err(EphimailError::Config(msg)) => assert!(msg.contains("config parse error")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_backend() {
        let result = Config::parse("[storage]\nbackend = \"postgres\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[smtp]\nport = 2526\nallowed_domains = [\"example.com\"]").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.smtp.port, 2526);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(EphimailError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let vars = ["ALLOWED_DOMAINS", "MAIL_PORT", "EMAIL_TTL"];
        let originals: Vec<_> = vars.iter().map(|v| std::env::var(v).ok()).collect();

        std::env::set_var("ALLOWED_DOMAINS", "example.com, ,example.net");
        std::env::set_var("MAIL_PORT", "not-a-port");
        std::env::set_var("EMAIL_TTL", "0");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.smtp.allowed_domains, vec!["example.com", "example.net"]);
        // Unparsable values are ignored
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.storage.email_ttl_hours, 0);

        for (var, original) in vars.iter().zip(originals) {
            match original {
                Some(val) => std::env::set_var(var, val),
                None => std::env::remove_var(var),
            }
        }
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a.com,b.com"), vec!["a.com", "b.com"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_validate_empty_allow_list() {
        let config = Config::default();
        match config.validate() {
            Err(EphimailError::Validation(msg)) => assert!(msg.contains("allowed_domains")),
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_queue_capacity() {
        let mut config = Config::default();
        config.smtp.allowed_domains = vec!["example.com".to_string()];
        config.hub.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
