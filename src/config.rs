//! Configuration for murmur, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{DEFAULT_KEYRING_SERVICE, DEFAULT_REFRESH_PATH};
use crate::classifier::ClassifierSettings;
use crate::classifier::health::DEFAULT_HEALTH_PATH;
use crate::connection::{ConnectionOptions, ReconnectPolicy};
use crate::error::{MurmurError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    /// Backend endpoints.
    pub server: ServerConfig,
    /// Persistent connection behaviour.
    pub connection: ConnectionConfig,
    /// Credential storage and refresh.
    pub auth: AuthConfig,
    /// Classification policy.
    pub classifier: ClassifierConfig,
    /// Result cache.
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
}

/// Backend endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Duplex endpoint (`ws://` or `wss://`).
    pub ws_url: String,
    /// Base URL for HTTP calls (refresh, health).
    pub http_base_url: String,
    pub health_path: String,
    pub refresh_path: String,
    /// Sent with every classification request when set.
    pub user_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_owned(),
            http_base_url: "http://127.0.0.1:8080".to_owned(),
            health_path: DEFAULT_HEALTH_PATH.to_owned(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            user_id: None,
        }
    }
}

/// Persistent connection behaviour. All times in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub request_timeout_ms: u64,
    /// 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.max_reconnect_attempts,
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Credential storage and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Keyring service name tokens are stored under.
    pub keyring_service: String,
    pub refresh_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keyring_service: DEFAULT_KEYRING_SERVICE.to_owned(),
            refresh_timeout_ms: 15_000,
        }
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

/// Classification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub prefer_remote: bool,
    pub enable_caching: bool,
    /// Remote attempts per call, clamped to 1..=5.
    pub max_retries: u32,
    /// Per-attempt timeout, clamped to 5 000..=30 000.
    pub timeout_ms: u64,
    pub include_suggestions: bool,
    pub use_context: bool,
    pub retry_base_delay_ms: u64,
    pub history_limit: usize,
    pub health_check_interval_ms: u64,
    /// Results below this confidence ask for confirmation.
    pub confirmation_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            prefer_remote: true,
            enable_caching: true,
            max_retries: 3,
            timeout_ms: 10_000,
            include_suggestions: true,
            use_context: true,
            retry_base_delay_ms: 500,
            history_limit: 10,
            health_check_interval_ms: 60_000,
            confirmation_threshold: 0.7,
        }
    }
}

/// Result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 100,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Latency samples kept per path.
    pub sample_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { sample_window: 100 }
    }
}

/// Certificate trust.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM files to trust exclusively. Empty means system roots.
    pub pinned_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Write daily-rolling log files here as well as to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "murmur=info".to_owned(),
            log_dir: None,
        }
    }
}

impl MurmurConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| MurmurError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MurmurError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/murmur/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = dirs::config_dir() {
            config.join("murmur").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("murmur")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/murmur-config/config.toml")
        }
    }

    /// Reject values that cannot work. Out-of-range retries and timeouts are
    /// clamped later rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MurmurError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, why: &str| Err(MurmurError::Config(format!("{field}: {why}")));

        if url::Url::parse(&self.server.ws_url).is_err() {
            return invalid("server.ws_url", "not a valid URL");
        }
        if url::Url::parse(&self.server.http_base_url).is_err() {
            return invalid("server.http_base_url", "not a valid URL");
        }
        if self.connection.request_timeout_ms == 0 {
            return invalid("connection.request_timeout_ms", "must be positive");
        }
        if self.connection.reconnect_base_delay_ms > self.connection.reconnect_max_delay_ms {
            return invalid(
                "connection.reconnect_base_delay_ms",
                "must not exceed reconnect_max_delay_ms",
            );
        }
        if self.cache.ttl_secs == 0 {
            return invalid("cache.ttl_secs", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.classifier.confirmation_threshold) {
            return invalid("classifier.confirmation_threshold", "must be within 0..=1");
        }
        if self.metrics.sample_window == 0 {
            return invalid("metrics.sample_window", "must be positive");
        }
        Ok(())
    }

    /// Façade settings with retries and timeout clamped to their safe ranges.
    pub fn classifier_settings(&self) -> ClassifierSettings {
        let c = &self.classifier;
        ClassifierSettings {
            prefer_remote: c.prefer_remote,
            enable_caching: c.enable_caching,
            max_retries: c.max_retries,
            timeout: Duration::from_millis(c.timeout_ms),
            include_suggestions: c.include_suggestions,
            use_context: c.use_context,
            retry_base_delay: Duration::from_millis(c.retry_base_delay_ms),
            history_limit: c.history_limit,
            health_check_interval: Duration::from_millis(c.health_check_interval_ms),
            confirmation_threshold: c.confirmation_threshold,
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            cache_max_entries: self.cache.max_entries,
            cache_sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
            metrics_window: self.metrics.sample_window,
        }
        .clamped()
    }
}
