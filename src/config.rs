//! Configuration Module
//!
//! Handles configuration loading from Java-style .properties files (KEY=VALUE
//! format) into a typed struct validated once at parse time.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse property '{key}': {reason}")]
    ParseError { key: String, reason: String },
}

/// How the session presents its credentials to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Signed FX-ACCESS-* headers on the HTTP upgrade request.
    Headers,
    /// Signed in-band auth message sent right after the connection opens.
    Message,
}

/// Reconnect policy applied when the transport closes or errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Streaming client configuration
///
/// Property names: HOST, PATH, USE_SSL, API_KEY, SECRET_KEY, PASSPHRASE,
/// TOKEN_PAIRS, LEVELS, QUANTITY_TOKEN, AUTH_MODE, RETRY_ON_ERROR,
/// NUM_RETRIES, RETRY_DELAY_MS, REPORT_EVERY, FRESH_IDS_ON_RECONNECT,
/// LOG_STREAMS
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub path: String,
    pub use_ssl: bool,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    pub token_pairs: Vec<String>,
    pub levels: Vec<f64>,
    pub quantity_token: Option<String>,
    pub auth_mode: AuthMode,
    pub retry: RetryPolicy,
    /// Report the running average every N updates per correlation id.
    pub report_every: u64,
    /// Start each reconnect attempt with fresh correlation ids and an empty
    /// latency history instead of continuing the existing series.
    pub fresh_ids_on_reconnect: bool,
    pub log_streams: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "stream.falconx.io".into(),
            path: "/price.tickers".into(),
            use_ssl: true,
            api_key: String::new(),
            secret: String::new(),
            passphrase: String::new(),
            token_pairs: vec!["BTC/USD".into()],
            levels: vec![1.0, 2.0],
            quantity_token: None,
            auth_mode: AuthMode::Message,
            retry: RetryPolicy::default(),
            report_every: 1,
            fresh_ids_on_reconnect: false,
            log_streams: false,
        }
    }
}

impl Config {
    /// Parse a Java-style .properties file into a HashMap.
    /// Skips blank lines and lines starting with '#'.
    fn parse_properties(content: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        map
    }

    /// Load configuration from a .properties file (KEY=VALUE format).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_properties_str(&content)
    }

    /// Parse config from a properties-format string.
    pub fn from_properties_str(content: &str) -> Result<Self, ConfigError> {
        let props = Self::parse_properties(content);
        let defaults = Config::default();

        Ok(Config {
            host: props.get("HOST").cloned().unwrap_or(defaults.host),
            path: props.get("PATH").cloned().unwrap_or(defaults.path),
            use_ssl: props.get("USE_SSL")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.use_ssl),
            api_key: props.get("API_KEY").cloned().unwrap_or(defaults.api_key),
            secret: props.get("SECRET_KEY").cloned().unwrap_or(defaults.secret),
            passphrase: props.get("PASSPHRASE").cloned().unwrap_or(defaults.passphrase),
            token_pairs: props.get("TOKEN_PAIRS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.token_pairs),
            levels: props.get("LEVELS")
                .map(|v| v.split(',')
                    .map(|s| s.trim().parse::<f64>().map_err(|_| ConfigError::ParseError {
                        key: "LEVELS".into(), reason: format!("invalid number in list: {}", s.trim()),
                    }))
                    .collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or(defaults.levels),
            quantity_token: props.get("QUANTITY_TOKEN").cloned().or(defaults.quantity_token),
            auth_mode: props.get("AUTH_MODE")
                .map(|v| match v.to_ascii_lowercase().as_str() {
                    "headers" => Ok(AuthMode::Headers),
                    "message" => Ok(AuthMode::Message),
                    other => Err(ConfigError::ParseError {
                        key: "AUTH_MODE".into(),
                        reason: format!("expected 'headers' or 'message', got '{}'", other),
                    }),
                })
                .transpose()?
                .unwrap_or(defaults.auth_mode),
            retry: RetryPolicy {
                enabled: props.get("RETRY_ON_ERROR")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(defaults.retry.enabled),
                max_retries: props.get("NUM_RETRIES")
                    .map(|v| v.parse().map_err(|_| ConfigError::ParseError {
                        key: "NUM_RETRIES".into(), reason: format!("invalid u32: {}", v),
                    }))
                    .transpose()?
                    .unwrap_or(defaults.retry.max_retries),
                delay: props.get("RETRY_DELAY_MS")
                    .map(|v| v.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                        ConfigError::ParseError {
                            key: "RETRY_DELAY_MS".into(), reason: format!("invalid u64: {}", v),
                        }
                    }))
                    .transpose()?
                    .unwrap_or(defaults.retry.delay),
            },
            report_every: props.get("REPORT_EVERY")
                .map(|v| match v.parse::<u64>() {
                    Ok(n) if n >= 1 => Ok(n),
                    _ => Err(ConfigError::ParseError {
                        key: "REPORT_EVERY".into(),
                        reason: format!("must be a positive integer: {}", v),
                    }),
                })
                .transpose()?
                .unwrap_or(defaults.report_every),
            fresh_ids_on_reconnect: props.get("FRESH_IDS_ON_RECONNECT")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.fresh_ids_on_reconnect),
            log_streams: props.get("LOG_STREAMS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.log_streams),
        })
    }

    /// Load configuration from ./config.properties, falling back to defaults.
    pub fn load_or_default() -> Self {
        let path = "config.properties";
        if Path::new(path).exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path, e);
                }
            }
        }

        log::warn!("No config.properties found, using defaults");
        Self::default()
    }

    /// Generate the WebSocket URL based on configuration
    pub fn websocket_url(&self) -> String {
        let protocol = if self.use_ssl { "wss" } else { "ws" };
        format!("{}://{}{}", protocol, self.host, self.path)
    }

    /// Log configuration parameters for debugging. The secret and
    /// passphrase are never logged.
    pub fn log_config(&self) {
        log::debug!("Configuration:");
        log::debug!("  host: {}", self.host);
        log::debug!("  path: {}", self.path);
        log::debug!("  use_ssl: {}", self.use_ssl);
        log::debug!("  api_key: {}", self.api_key);
        log::debug!("  token_pairs: {:?}", self.token_pairs);
        log::debug!("  levels: {:?}", self.levels);
        log::debug!("  quantity_token: {:?}", self.quantity_token);
        log::debug!("  auth_mode: {:?}", self.auth_mode);
        log::debug!("  retry: {:?}", self.retry);
        log::debug!("  report_every: {}", self.report_every);
        log::debug!("  fresh_ids_on_reconnect: {}", self.fresh_ids_on_reconnect);
        log::debug!("  log_streams: {}", self.log_streams);
    }
}
