//! rtmux-check - validate a client options file.
//!
//! Loads the TOML file given as the first argument (default `rtmux.toml`),
//! reports every validation error and prints the effective connection policy.

use std::process::ExitCode;

use rtmux::{ClientOptions, FallbackHosts, telemetry};
use tracing::{error, info};

fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rtmux.toml".to_string());

    let options = match ClientOptions::load(&path) {
        Ok(options) => options,
        Err(e) => {
            telemetry::init("info");
            error!(path = %path, error = %e, "invalid client options");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init(&options.log_level);

    let hosts = FallbackHosts::new(
        options.realtime_host.clone(),
        options.fallback_hosts.clone(),
        options.fallback_retry_timeout(),
    );
    info!(
        path = %path,
        primary = hosts.primary(),
        fallbacks = hosts.fallbacks().len(),
        client_id = options.client_id.as_deref().unwrap_or("-"),
        "options valid"
    );
    info!(
        request_timeout = ?options.request_timeout(),
        disconnected_retry = ?options.disconnected_retry_timeout(),
        max_retry_interval = ?options.max_retry_interval(),
        suspend_after = options.suspend_after_retries,
        suspended_retry = ?options.suspended_retry_timeout(),
        connection_state_ttl = ?options.connection_state_ttl(),
        max_retry_duration = ?options.max_retry_duration(),
        "retry policy"
    );
    for (attempt, host) in hosts.cycle().enumerate() {
        info!(attempt = attempt + 1, host = %host, "host order");
    }
    ExitCode::SUCCESS
}
