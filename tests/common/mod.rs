//! Integration test common infrastructure.
//!
//! Provides an in-memory transport, a scripted server that plays the service
//! side of each link, and helpers for recording emitted events.

pub mod server;
pub mod transport;

#[allow(unused_imports)]
pub use server::TestServer;
#[allow(unused_imports)]
pub use transport::{Attempt, MockLink, MockTransport};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtmux::ClientOptions;

/// Options tuned for deterministic tests: no jitter, short retries, two fallbacks.
#[allow(dead_code)]
pub fn options() -> ClientOptions {
    ClientOptions {
        realtime_host: "primary.test".to_string(),
        fallback_hosts: vec!["fb-a.test".to_string(), "fb-b.test".to_string()],
        retry_jitter: 0.0,
        disconnected_retry_timeout_ms: 1_000,
        max_retry_interval_ms: 8_000,
        suspend_after_retries: 2,
        suspended_retry_timeout_ms: 30_000,
        realtime_request_timeout_ms: 5_000,
        close_timeout_ms: 2_000,
        ..ClientOptions::default()
    }
}

/// Let spawned tasks run until they are all waiting.
///
/// With a paused clock the runtime only advances time once every task is idle,
/// so the short sleep returns after all ready work has been processed.
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A shared log and a listener closure that appends to it.
#[allow(dead_code)]
pub fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
{
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    (log, move |item: &T| sink.lock().push(item.clone()))
}
