//! Retry policy for failed connection attempts.
//!
//! Pure bookkeeping: the driver reports failures with the current time and gets
//! back what to do next. No timers or I/O here.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::ClientOptions;

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RetryDecision {
    /// Stay disconnected and retry after the delay; the resume key is kept.
    Disconnected(Duration),
    /// Suspend and retry after the fixed suspended interval.
    Suspended(Duration),
    /// Stop retrying; the total retry budget is spent.
    Fail(Duration),
}

/// Timing parameters, taken from [`ClientOptions`].
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub suspended: Duration,
    pub jitter: f64,
    pub suspend_after: u32,
    pub max_duration: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            base: options.disconnected_retry_timeout(),
            max: options.max_retry_interval(),
            suspended: options.suspended_retry_timeout(),
            jitter: options.retry_jitter,
            suspend_after: options.suspend_after_retries,
            max_duration: options.max_retry_duration(),
        }
    }

    /// Exponential backoff for the `attempt`th consecutive failure (1-based),
    /// capped at `max` and reduced by up to `jitter`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(1u32 << exponent).min(self.max);
        if self.jitter <= 0.0 {
            return raw;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=1.0);
        raw.mul_f64(factor)
    }
}

/// Consecutive-failure bookkeeping between two successful connections.
#[derive(Debug, Default)]
pub(crate) struct RetryTracker {
    failures: u32,
    disconnected_since: Option<Instant>,
    suspended: bool,
}

impl RetryTracker {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Record the start of a disconnection if one is not already running.
    pub fn mark_disconnected(&mut self, now: Instant) {
        self.disconnected_since.get_or_insert(now);
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// `state_ttl` is how long the server keeps the connection resumable.
    pub fn record_failure(
        &mut self,
        policy: &RetryPolicy,
        now: Instant,
        state_ttl: Duration,
    ) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        let since = *self.disconnected_since.get_or_insert(now);
        let elapsed = now.saturating_duration_since(since);

        if let Some(budget) = policy.max_duration
            && elapsed >= budget
        {
            return RetryDecision::Fail(budget);
        }
        if self.suspended || self.failures > policy.suspend_after || elapsed >= state_ttl {
            self.suspended = true;
            return RetryDecision::Suspended(policy.suspended);
        }
        RetryDecision::Disconnected(policy.backoff(self.failures))
    }

    /// A connection succeeded or the application restarted the cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
