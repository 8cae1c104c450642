//! Bounded waits for attach, detach and connect.
//!
//! A [`Wait`] limits how long a caller blocks on a transition. Expiry or
//! cancellation ends only the caller's wait; the transition itself continues and
//! still emits its events.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Deadline and cancellation for a blocking call.
#[derive(Debug, Clone, Default)]
pub struct Wait {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Wait {
    /// Wait with no bound.
    pub fn forever() -> Self {
        Self::default()
    }

    /// Give up after `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Give up when `token` is cancelled.
    pub fn cancellable(token: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel: Some(token),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Drive `fut` until it completes or the wait ends.
    pub(crate) async fn run<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let bounded = async {
            match self.timeout {
                Some(after) => tokio::time::timeout(after, fut)
                    .await
                    .map_err(|_| Error::Timeout { operation, after })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(Error::Cancelled(operation)),
            result = bounded => result,
        }
    }
}

impl From<Duration> for Wait {
    fn from(timeout: Duration) -> Self {
        Self::timeout(timeout)
    }
}
