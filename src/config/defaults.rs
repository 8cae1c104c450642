//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Endpoint Defaults
// =============================================================================

pub fn default_realtime_host() -> String {
    "realtime.ably.io".to_string()
}

pub fn default_fallback_hosts() -> Vec<String> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .map(|prefix| format!("{prefix}.ably-realtime.com"))
        .collect()
}

/// How long a successful fallback host stays preferred.
pub fn default_fallback_retry_timeout_ms() -> u64 {
    600_000
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Timeout Defaults
// =============================================================================

pub fn default_realtime_request_timeout_ms() -> u64 {
    10_000
}

pub fn default_close_timeout_ms() -> u64 {
    10_000
}

// =============================================================================
// Retry Defaults
// =============================================================================

pub fn default_disconnected_retry_timeout_ms() -> u64 {
    15_000
}

pub fn default_max_retry_interval_ms() -> u64 {
    60_000
}

pub fn default_suspended_retry_timeout_ms() -> u64 {
    30_000
}

pub fn default_connection_state_ttl_ms() -> u64 {
    120_000
}

pub fn default_suspend_after_retries() -> u32 {
    5
}

pub fn default_retry_jitter() -> f64 {
    0.2
}

// =============================================================================
// Channel Defaults
// =============================================================================

pub fn default_max_channel_queue() -> usize {
    1000
}

pub fn default_presence_stale_threshold_ms() -> u64 {
    60_000
}
