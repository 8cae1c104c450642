//! Configuration validation.
//!
//! Validates options at construction to catch common errors early.

use super::ClientOptions;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("realtime_host is required")]
    MissingRealtimeHost,
    #[error("fallback_hosts contains an empty entry at index {0}")]
    EmptyFallbackHost(usize),
    #[error("fallback_hosts lists '{0}' more than once")]
    DuplicateFallbackHost(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("max_retry_interval_ms ({max}) is below disconnected_retry_timeout_ms ({base})")]
    RetryIntervalBelowBase { base: u64, max: u64 },
    #[error("retry_jitter must be in [0, 1), got {0}")]
    InvalidJitter(f64),
    #[error("suspend_after_retries must be at least 1")]
    ZeroSuspendThreshold,
    #[error("max_channel_queue must be at least 1")]
    ZeroChannelQueue,
    #[error("client_id must not be empty or '*'")]
    InvalidClientId,
}

/// Validate options, returning all errors found.
pub fn validate(options: &ClientOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Endpoints
    if options.realtime_host.trim().is_empty() {
        errors.push(ValidationError::MissingRealtimeHost);
    }
    let mut seen = std::collections::HashSet::new();
    for (index, host) in options.fallback_hosts.iter().enumerate() {
        if host.trim().is_empty() {
            errors.push(ValidationError::EmptyFallbackHost(index));
        } else if !seen.insert(host.as_str()) {
            errors.push(ValidationError::DuplicateFallbackHost(host.clone()));
        }
    }

    // Timers
    for (name, value) in [
        ("realtime_request_timeout_ms", options.realtime_request_timeout_ms),
        ("disconnected_retry_timeout_ms", options.disconnected_retry_timeout_ms),
        ("suspended_retry_timeout_ms", options.suspended_retry_timeout_ms),
        ("close_timeout_ms", options.close_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration(name));
        }
    }
    if options.max_retry_interval_ms < options.disconnected_retry_timeout_ms {
        errors.push(ValidationError::RetryIntervalBelowBase {
            base: options.disconnected_retry_timeout_ms,
            max: options.max_retry_interval_ms,
        });
    }
    if !(0.0..1.0).contains(&options.retry_jitter) {
        errors.push(ValidationError::InvalidJitter(options.retry_jitter));
    }
    if options.suspend_after_retries == 0 {
        errors.push(ValidationError::ZeroSuspendThreshold);
    }

    // Channels
    if options.max_channel_queue == 0 {
        errors.push(ValidationError::ZeroChannelQueue);
    }
    if let Some(client_id) = &options.client_id
        && (client_id.is_empty() || client_id == "*")
    {
        errors.push(ValidationError::InvalidClientId);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
