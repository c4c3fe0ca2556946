//! File-based configuration for a [`GatewayClient`](crate::client::GatewayClient).
//!
//! Every key is optional; missing keys take the local-gateway defaults.
//!
//! ```toml
//! base_url = "https://localhost:5000/v1/portal"
//! websocket_url = "wss://localhost:5000/v1/api/ws"
//! certificate_path = "keytest_public.pem"
//! request_timeout_sec = 10
//! verify_tls = false
//! heartbeat_interval_sec = 60
//! heartbeat_token = "tic"
//! watchdog_interval_sec = 60.0
//! watchdog_autostart = true
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http::{RequestExecutorOptions, DEFAULT_BASE_URL};
use crate::stream::proto::DEFAULT_HEARTBEAT_TOKEN;
use crate::stream::session::{StreamConfig, DEFAULT_CERTIFICATE_PATH, DEFAULT_STREAM_URL};
use crate::watchdog::WatchdogConfig;

pub const ENV_BASE_URL: &str = "CLIENTPORTAL_BASE_URL";
pub const ENV_WEBSOCKET_URL: &str = "CLIENTPORTAL_WEBSOCKET_URL";
pub const ENV_CERTIFICATE_PATH: &str = "CLIENTPORTAL_CERTIFICATE_PATH";
pub const ENV_VERIFY_TLS: &str = "CLIENTPORTAL_VERIFY_TLS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP base URL; endpoint paths are appended verbatim.
    pub base_url: String,
    pub websocket_url: String,
    /// Certificate the streaming peer must chain to.
    pub certificate_path: PathBuf,
    pub request_timeout_sec: u64,
    /// Verify the HTTP peer certificate.
    pub verify_tls: bool,
    /// Socket keepalive period; `0` turns the keepalive frame off.
    pub heartbeat_interval_sec: u64,
    pub heartbeat_token: String,
    /// `/tickle` period; `<= 0` disables the keepalive watchdog.
    pub watchdog_interval_sec: f64,
    pub watchdog_autostart: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            websocket_url: DEFAULT_STREAM_URL.to_string(),
            certificate_path: PathBuf::from(DEFAULT_CERTIFICATE_PATH),
            request_timeout_sec: 10,
            verify_tls: false,
            heartbeat_interval_sec: 60,
            heartbeat_token: DEFAULT_HEARTBEAT_TOKEN.to_string(),
            watchdog_interval_sec: 60.0,
            watchdog_autostart: true,
        }
    }
}

impl GatewayConfig {
    /// Loads a TOML file, applies `CLIENTPORTAL_*` environment overrides and
    /// validates the result.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut config: GatewayConfig = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates TOML without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(url) = lookup(ENV_WEBSOCKET_URL) {
            self.websocket_url = url;
        }
        if let Some(path) = lookup(ENV_CERTIFICATE_PATH) {
            self.certificate_path = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_VERIFY_TLS) {
            self.verify_tls = parse_flag(&value).ok_or_else(|| {
                ConfigError::Invalid(format!("{ENV_VERIFY_TLS} is not a boolean: {value:?}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("base_url {:?}: {err}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http or https, got {:?}",
                base.scheme()
            )));
        }

        let socket = url::Url::parse(&self.websocket_url).map_err(|err| {
            ConfigError::Invalid(format!("websocket_url {:?}: {err}", self.websocket_url))
        })?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "websocket_url must be ws or wss, got {:?}",
                socket.scheme()
            )));
        }

        if self.request_timeout_sec == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_sec must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_token.is_empty() {
            return Err(ConfigError::Invalid("heartbeat_token cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_options(&self) -> RequestExecutorOptions {
        RequestExecutorOptions {
            timeout: Duration::from_secs(self.request_timeout_sec),
            verify_tls: self.verify_tls,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(self.websocket_url.clone(), self.certificate_path.clone())
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_interval_sec))
            .with_heartbeat_token(self.heartbeat_token.clone())
    }

    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig::from_secs_f64(self.watchdog_interval_sec, self.watchdog_autostart)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
