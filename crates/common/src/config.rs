//! Client configuration
//!
//! Configuration is an explicit value handed to each client at construction.
//! It is assembled from defaults, an optional TOML file and the `HUMANLAYER_*`
//! environment variables, in that order of precedence (environment wins).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::types::{genid, ContactChannel};

pub const DEFAULT_API_BASE_URL: &str = "https://api.humanlayer.dev/humanlayer/v1";

pub const ENV_API_KEY: &str = "HUMANLAYER_API_KEY";
pub const ENV_API_BASE: &str = "HUMANLAYER_API_BASE";
pub const ENV_RUN_ID: &str = "HUMANLAYER_RUN_ID";
pub const ENV_HTTP_TIMEOUT: &str = "HUMANLAYER_HTTP_TIMEOUT_SECONDS";
pub const ENV_CONTACT_EMAIL: &str = "HUMANLAYER_CONTACT_EMAIL";

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write configuration file '{path}'")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the approval service API
    pub api_base_url: String,

    /// Bearer token. Never written back out by `save_to_file`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Groups related calls in the service UI
    pub run_id: Option<String>,

    /// Used as the run id prefix when no run id is configured
    pub agent_name: String,

    /// Per-request timeout
    pub http_timeout_secs: u64,

    /// Delay between decision polls
    pub poll_interval_ms: u64,

    /// Default delivery target for requests that do not name one
    pub contact_channel: Option<ContactChannel>,

    pub retry: RetryConfig,

    pub events: EventStreamConfig,

    pub logging: LoggingConfig,
}

/// Retry behaviour for retryable failures (transport errors, 5xx)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retries
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

/// Event stream subscription settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStreamConfig {
    /// Path of the SSE endpoint relative to `api_base_url`
    pub path: String,

    /// Consecutive failed reconnects before the stream gives up
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            run_id: None,
            agent_name: "agent".to_string(),
            contact_channel: None,
            http_timeout_secs: 10,
            poll_interval_ms: 3000,
            retry: RetryConfig::default(),
            events: EventStreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            path: "/stream/events".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration: defaults, then the optional file, then environment
    pub fn load(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Override fields from `HUMANLAYER_*` environment variables
    pub fn apply_env(&mut self) {
        if let Some(key) = non_empty_env(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(base) = non_empty_env(ENV_API_BASE) {
            self.api_base_url = base;
        }
        if let Some(run_id) = non_empty_env(ENV_RUN_ID) {
            self.run_id = Some(run_id);
        }
        if let Some(timeout) = non_empty_env(ENV_HTTP_TIMEOUT) {
            match timeout.parse::<u64>() {
                Ok(secs) => self.http_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    "Ignoring non-numeric {}={}",
                    ENV_HTTP_TIMEOUT,
                    timeout
                ),
            }
        }
        if self.contact_channel.is_none() {
            if let Some(address) = non_empty_env(ENV_CONTACT_EMAIL) {
                self.contact_channel = Some(ContactChannel::email(address));
            }
        }
    }

    /// TOML rendering of the effective configuration, without the API key
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Example configuration file contents
    pub fn generate_example() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Default location: `<config dir>/hitl/config.toml`
    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("hitl").join("config.toml")
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let parsed = Url::parse(&self.api_base_url).map_err(|e| ConfigError::InvalidValue {
            field: "api_base_url".to_string(),
            value: format!("{} ({})", self.api_base_url, e),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ConfigError::InvalidValue {
                    field: "api_base_url".to_string(),
                    value: format!("Unsupported scheme: {}", scheme),
                })
            }
        }

        if self.http_timeout_secs == 0 {
            return Err(invalid("http_timeout_secs", "must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if !self.events.path.starts_with('/') {
            return Err(invalid("events.path", "must start with '/'"));
        }

        Ok(())
    }

    /// API key, or an error naming the variable to set
    pub fn require_api_key(&self) -> ConfigResult<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("api_key (set {} or pass --api-key)", ENV_API_KEY),
            })
    }

    /// Configured run id, or a fresh one derived from the agent name
    pub fn resolved_run_id(&self) -> String {
        self.run_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| genid(&slug(&self.agent_name)))
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: message.to_string(),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Lowercase, dash-separated form of an agent name
fn slug(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug
    }
}
