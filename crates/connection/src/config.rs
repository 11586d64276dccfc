//! Service configuration.
//!
//! Built from defaults, environment variables (`TETHER_*`), or a JSON
//! file. Nested sections cover TLS, reconnection, and WebSocket tuning.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transport security options for both the HTTP client and the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Verify the server certificate. Disabling this is for lab setups
    /// with self-signed teamservers only.
    pub verify: bool,
    /// Custom trust anchor (PEM).
    pub ca_file: Option<PathBuf>,
    /// Client certificate (PEM), presented together with `client_key`.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify: true,
            ca_file: None,
            client_cert: None,
            client_key: None,
        }
    }
}

/// Reconnection budget with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failed attempts before the channel is declared lost.
    pub max_attempts: u32,
    /// Initial delay in seconds.
    pub delay: f64,
    /// Multiplier applied per attempt.
    pub backoff: f64,
    /// Delay cap in seconds.
    pub max_delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: 1.0,
            backoff: 2.0,
            max_delay: 30.0,
        }
    }
}

impl RetryConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.delay * self.backoff.powi(exp);
        let capped = secs.min(self.max_delay);
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

/// WebSocket tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Keepalive ping period in seconds.
    pub ping_interval: f64,
    /// Grace period after a ping before the peer counts as dead.
    pub ping_timeout: f64,
    /// Close handshake timeout in seconds.
    pub close_timeout: f64,
    /// Maximum inbound frame size in bytes.
    pub max_size: usize,
    /// Compression profile name; reserved, the current transport
    /// negotiates none.
    pub compression: Option<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: 30.0,
            ping_timeout: 10.0,
            close_timeout: 5.0,
            max_size: 10 * 1024 * 1024,
            compression: None,
        }
    }
}

impl WsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout)
    }

    /// How long the channel may stay silent before the peer counts as
    /// dead: one ping period plus the pong grace period.
    pub fn idle_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval + self.ping_timeout)
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory for persisted state (sessions).
    pub data_dir: PathBuf,
    /// Teamserver base URL (`http://` or `https://`).
    pub server_url: String,
    /// Prefix prepended to every REST path.
    pub api_prefix: String,
    /// Prefix prepended to the channel endpoint path.
    pub ws_prefix: String,
    /// Shared secret; only its SHA-256 digest ever leaves the process.
    pub password: Option<String>,
    pub tls: TlsConfig,
    pub retry: RetryConfig,
    pub websocket: WsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            server_url: "http://localhost:3000".into(),
            api_prefix: String::new(),
            ws_prefix: "/ws".into(),
            password: None,
            tls: TlsConfig::default(),
            retry: RetryConfig::default(),
            websocket: WsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Builds a configuration from `TETHER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_var("TETHER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            server_url: env_var("TETHER_SERVER_URL").unwrap_or(defaults.server_url),
            api_prefix: env_var("TETHER_API_PREFIX").unwrap_or(defaults.api_prefix),
            ws_prefix: env_var("TETHER_WS_PREFIX").unwrap_or(defaults.ws_prefix),
            password: env_var("TETHER_PASSWORD"),
            tls: TlsConfig {
                enabled: env_parse("TETHER_TLS_ENABLED", defaults.tls.enabled),
                verify: env_parse("TETHER_TLS_VERIFY", defaults.tls.verify),
                ca_file: env_var("TETHER_TLS_CA_FILE").map(PathBuf::from),
                client_cert: env_var("TETHER_TLS_CLIENT_CERT").map(PathBuf::from),
                client_key: env_var("TETHER_TLS_CLIENT_KEY").map(PathBuf::from),
            },
            retry: RetryConfig {
                max_attempts: env_parse("TETHER_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                delay: env_parse("TETHER_RETRY_DELAY", defaults.retry.delay),
                backoff: env_parse("TETHER_RETRY_BACKOFF", defaults.retry.backoff),
                max_delay: env_parse("TETHER_RETRY_MAX_DELAY", defaults.retry.max_delay),
            },
            websocket: WsConfig {
                ping_interval: env_parse("TETHER_WS_PING_INTERVAL", defaults.websocket.ping_interval),
                ping_timeout: env_parse("TETHER_WS_PING_TIMEOUT", defaults.websocket.ping_timeout),
                close_timeout: env_parse("TETHER_WS_CLOSE_TIMEOUT", defaults.websocket.close_timeout),
                max_size: env_parse("TETHER_WS_MAX_SIZE", defaults.websocket.max_size),
                compression: env_var("TETHER_WS_COMPRESSION"),
            },
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Writes the configuration to a JSON file, creating parent
    /// directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
