//! Client configuration.
//!
//! [`ClientOptions`] is passed explicitly to [`crate::Realtime::new`]; there is
//! no process-wide default. Every field has a serde default, so an empty TOML
//! document is a valid configuration.

mod defaults;
mod validation;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use defaults::*;
pub use validation::{ValidationError, validate};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Options for a realtime client.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientOptions {
    /// Primary realtime endpoint.
    #[serde(default = "default_realtime_host")]
    pub realtime_host: String,
    /// Alternate endpoints, tried in order when the primary is unreachable.
    #[serde(default = "default_fallback_hosts")]
    pub fallback_hosts: Vec<String>,
    /// Connect as soon as the client is constructed.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Default tracing filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Negotiate MessagePack instead of JSON.
    #[serde(default = "default_true")]
    pub use_binary_protocol: bool,
    /// Deliver our own published messages back to us.
    #[serde(default = "default_true")]
    pub echo_messages: bool,
    /// Queue publishes while the connection is not connected.
    #[serde(default = "default_true")]
    pub queue_messages: bool,
    /// Client identity, required for presence.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Default bound for attach/detach/connect waits.
    #[serde(default = "default_realtime_request_timeout_ms")]
    pub realtime_request_timeout_ms: u64,
    /// Base retry delay while disconnected.
    #[serde(default = "default_disconnected_retry_timeout_ms")]
    pub disconnected_retry_timeout_ms: u64,
    /// Upper bound for the backoff delay.
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    /// Fixed retry delay while suspended.
    #[serde(default = "default_suspended_retry_timeout_ms")]
    pub suspended_retry_timeout_ms: u64,
    /// How long the resume key stays usable after a disconnect.
    #[serde(default = "default_connection_state_ttl_ms")]
    pub connection_state_ttl_ms: u64,
    /// Consecutive failed attempts before the connection suspends.
    #[serde(default = "default_suspend_after_retries")]
    pub suspend_after_retries: u32,
    /// Total time spent retrying before the connection fails. Unbounded if unset.
    #[serde(default)]
    pub max_retry_duration_ms: Option<u64>,
    /// Fraction of each retry delay randomized, in `[0, 1)`.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    /// How long to wait for CLOSED before forcing the connection closed.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// How long a successful fallback host stays preferred.
    #[serde(default = "default_fallback_retry_timeout_ms")]
    pub fallback_retry_timeout_ms: u64,
    /// Per-channel limit on messages queued while not attached.
    #[serde(default = "default_max_channel_queue")]
    pub max_channel_queue: usize,
    /// Presence maps stale for longer than this are cleared on re-attach.
    #[serde(default = "default_presence_stale_threshold_ms")]
    pub presence_stale_threshold_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            realtime_host: default_realtime_host(),
            fallback_hosts: default_fallback_hosts(),
            auto_connect: true,
            log_level: default_log_level(),
            use_binary_protocol: true,
            echo_messages: true,
            queue_messages: true,
            client_id: None,
            realtime_request_timeout_ms: default_realtime_request_timeout_ms(),
            disconnected_retry_timeout_ms: default_disconnected_retry_timeout_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            suspended_retry_timeout_ms: default_suspended_retry_timeout_ms(),
            connection_state_ttl_ms: default_connection_state_ttl_ms(),
            suspend_after_retries: default_suspend_after_retries(),
            max_retry_duration_ms: None,
            retry_jitter: default_retry_jitter(),
            close_timeout_ms: default_close_timeout_ms(),
            fallback_retry_timeout_ms: default_fallback_retry_timeout_ms(),
            max_channel_queue: default_max_channel_queue(),
            presence_stale_threshold_ms: default_presence_stale_threshold_ms(),
        }
    }
}

impl ClientOptions {
    /// Load and validate options from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate options from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let options: ClientOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Check every option, reporting all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate(self).map_err(ConfigError::Invalid)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.realtime_request_timeout_ms)
    }

    pub fn disconnected_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnected_retry_timeout_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn suspended_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.suspended_retry_timeout_ms)
    }

    pub fn connection_state_ttl(&self) -> Duration {
        Duration::from_millis(self.connection_state_ttl_ms)
    }

    pub fn max_retry_duration(&self) -> Option<Duration> {
        self.max_retry_duration_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn fallback_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_retry_timeout_ms)
    }

    pub fn presence_stale_threshold(&self) -> Duration {
        Duration::from_millis(self.presence_stale_threshold_ms)
    }
}
