//! Client configuration
//!
//! Loaded from YAML, with the secret token optionally pulled from the
//! environment (`MESHWIRE_AUTH_TOKEN`, `.env` honoured) so it does not have
//! to live in the file:
//!
//! ```yaml
//! host: mesh.internal
//! port: 7400
//! source_id: sensor-12
//! queue_capacity: 512
//! compression:
//!   algorithm: zstd
//!   level: 3
//! tls:
//!   ca_path: /etc/mesh/ca.pem
//!   min_version: "1.2"
//! retry:
//!   max_attempts: 8
//!   initial_delay_ms: 250
//! ```

use crate::error::MeshError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment variable consulted when the file has no `auth_token`
pub const AUTH_TOKEN_ENV: &str = "MESHWIRE_AUTH_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for MeshError {
    fn from(e: ConfigError) -> Self {
        MeshError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// TLS protocol versions understood by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    Tls10,
    #[serde(rename = "1.1")]
    Tls11,
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of additional trust roots
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// PEM client certificate chain (requires `key_path`)
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// PEM PKCS#8 private key for `cert_path`
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    #[serde(default = "default_true")]
    pub verify_hostname: bool,
    #[serde(default)]
    pub min_version: Option<TlsVersion>,
    #[serde(default)]
    pub max_version: Option<TlsVersion>,
    /// Cipher-suite allow-list; logged, the platform TLS backend picks suites
    #[serde(default)]
    pub cipher_suites: Vec<String>,
    /// Name presented for SNI and hostname verification instead of `host`
    #[serde(default)]
    pub server_name: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_path: None,
            cert_path: None,
            key_path: None,
            verify_certificate: true,
            verify_hostname: true,
            min_version: None,
            max_version: None,
            cipher_suites: Vec::new(),
            server_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Gzip,
    Zstd,
}

impl CompressionAlgorithm {
    /// Accepted level range for this algorithm
    pub fn level_range(&self) -> (i32, i32) {
        match self {
            CompressionAlgorithm::None => (0, 0),
            CompressionAlgorithm::Deflate | CompressionAlgorithm::Gzip => (0, 9),
            CompressionAlgorithm::Zstd => (1, 22),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_compression_level")]
    pub level: i32,
}

impl CompressionConfig {
    pub fn new(algorithm: CompressionAlgorithm, level: i32) -> Self {
        Self { algorithm, level }
    }

    pub fn is_enabled(&self) -> bool {
        self.algorithm != CompressionAlgorithm::None
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            level: default_compression_level(),
        }
    }
}

/// Connect, read and write timeouts; each is independent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_io_ms")]
    pub read_ms: u64,
    #[serde(default = "default_io_ms")]
    pub write_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            read_ms: default_io_ms(),
            write_ms: default_io_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Overall budget for one connect sequence
    #[serde(default = "default_retry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_factor: default_jitter_factor(),
            timeout_ms: default_retry_timeout_ms(),
        }
    }
}

/// Everything a [`Client`](crate::Client) needs besides callbacks and plug-ins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Bearer token; `None` skips the authentication handshake
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Idle interval after which a `Ping` is sent; `None` disables heartbeats
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Identifier stamped on protocol messages (auth, ping)
    #[serde(default = "default_source_id")]
    pub source_id: String,

    /// Tolerance for peer clocks running ahead of ours
    #[serde(default)]
    pub max_clock_skew_ms: u64,

    /// Repair budget for consecutive invalid responses
    #[serde(default = "default_recovery_max_attempts")]
    pub recovery_max_attempts: u32,

    /// Prefix applied to every client metric name
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,
}

impl ClientConfig {
    /// Configuration with defaults for everything except the address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth_token: None,
            tls: None,
            compression: CompressionConfig::default(),
            queue_capacity: default_queue_capacity(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            heartbeat_interval_ms: None,
            auto_reconnect: true,
            max_frame_size: default_max_frame_size(),
            source_id: default_source_id(),
            max_clock_skew_ms: 0,
            recovery_max_attempts: default_recovery_max_attempts(),
            metrics_prefix: default_metrics_prefix(),
        }
    }

    /// Load configuration from a YAML file and the environment
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let yaml_content = std::fs::read_to_string(config_path.as_ref())?;
        let mut config: ClientConfig = serde_yaml::from_str(&yaml_content)?;

        if config.auth_token.is_none() {
            dotenv::dotenv().ok(); // Don't fail if .env doesn't exist
            config.auth_token = std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty());
            if config.auth_token.is_some() {
                debug!("Auth token taken from {}", AUTH_TOKEN_ENV);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port must be greater than 0"));
        }
        if self.source_id.is_empty() {
            return Err(invalid("source_id must not be empty"));
        }
        if matches!(self.auth_token, Some(ref token) if token.is_empty()) {
            return Err(invalid("auth_token must not be empty when set"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(invalid("max_frame_size must be between 1 and 4294967295"));
        }

        // Timeouts
        if self.timeouts.connect_ms == 0 || self.timeouts.read_ms == 0 || self.timeouts.write_ms == 0 {
            return Err(invalid("timeouts must be greater than 0"));
        }
        if self.heartbeat_interval_ms == Some(0) {
            return Err(invalid("heartbeat_interval_ms must be greater than 0"));
        }

        // Retry
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(invalid("retry.jitter_factor must be between 0 and 1"));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(invalid("retry.initial_delay_ms must be <= retry.max_delay_ms"));
        }
        if retry.timeout_ms == 0 {
            return Err(invalid("retry.timeout_ms must be greater than 0"));
        }

        // Compression
        if self.compression.is_enabled() {
            let (min, max) = self.compression.algorithm.level_range();
            if self.compression.level < min || self.compression.level > max {
                return Err(invalid(format!(
                    "compression.level {} outside {}..={} for {:?}",
                    self.compression.level, min, max, self.compression.algorithm
                )));
            }
        }

        // TLS
        if let Some(ref tls) = self.tls {
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                return Err(invalid("tls.cert_path and tls.key_path must be set together"));
            }
            if let (Some(min), Some(max)) = (tls.min_version, tls.max_version) {
                if min > max {
                    return Err(invalid("tls.min_version must be <= tls.max_version"));
                }
            }
            if matches!(tls.server_name, Some(ref name) if name.is_empty()) {
                return Err(invalid("tls.server_name must not be empty when set"));
            }
        }

        if !self
            .metrics_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
            || self.metrics_prefix.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(invalid("metrics_prefix may only contain [a-zA-Z0-9_:] and must not start with a digit"));
        }

        Ok(())
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }

    /// Upper bound on a blocking `connect()` call
    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.retry.timeout_ms) + self.timeouts.connect()
    }

    pub fn max_clock_skew(&self) -> Duration {
        Duration::from_millis(self.max_clock_skew_ms)
    }

    /// Has the authentication handshake enabled
    pub fn has_auth(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    6
}

fn default_connect_ms() -> u64 {
    5_000
}

fn default_io_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_retry_timeout_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    crate::protocol::DEFAULT_MAX_FRAME_SIZE
}

fn default_source_id() -> String {
    "meshwire-client".to_string()
}

fn default_recovery_max_attempts() -> u32 {
    3
}

fn default_metrics_prefix() -> String {
    "meshwire".to_string()
}
