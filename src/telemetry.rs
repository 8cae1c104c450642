//! Tracing setup and span constructors.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level`. Returns `false` if a global subscriber
/// was already installed.
pub fn init(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Standardized span constructors for engine observability.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for the connection driver.
    pub fn connection(client_id: Option<&str>) -> Span {
        match client_id {
            Some(client_id) => info_span!("connection", client_id = %client_id),
            None => info_span!("connection"),
        }
    }

    /// Span for operations on one channel.
    pub fn channel(name: &str) -> Span {
        info_span!("channel", channel = %name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let _ = init("debug");
        assert!(!init("debug"));
    }
}
