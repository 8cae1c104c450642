//! Fallback host selection.
//!
//! A connection attempt cycle walks the candidate hosts once each: the cached
//! host (if a recent success is cached), then the primary, then the fallbacks in
//! list order. The cache is a single slot holding the most recent successful
//! host until it expires.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedHost {
    host: String,
    expires_at: Instant,
}

/// Single-slot cache of the last host that accepted a connection.
#[derive(Debug)]
pub struct FallbackCache {
    slot: Mutex<Option<CachedHost>>,
    ttl: Duration,
}

impl FallbackCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// The cached host, if it has not expired.
    pub fn get(&self) -> Option<String> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(cached) if Instant::now() < cached.expires_at => Some(cached.host.clone()),
            Some(_) => {
                slot.take();
                None
            }
            None => None,
        }
    }

    /// Remember `host` as the last success, replacing any previous entry.
    pub fn put(&self, host: &str) {
        *self.slot.lock() = Some(CachedHost {
            host: host.to_string(),
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }
}

/// Primary host, ordered fallbacks and the success cache.
#[derive(Debug)]
pub struct FallbackHosts {
    primary: String,
    fallbacks: Vec<String>,
    cache: FallbackCache,
}

impl FallbackHosts {
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>, cache_ttl: Duration) -> Self {
        Self {
            primary: primary.into(),
            fallbacks,
            cache: FallbackCache::new(cache_ttl),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// Start a new attempt cycle.
    pub fn cycle(&self) -> HostCycle {
        let mut order = Vec::with_capacity(self.fallbacks.len() + 2);
        if let Some(cached) = self.cache.get() {
            order.push(cached);
        }
        order.push(self.primary.clone());
        order.extend(self.fallbacks.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        order.retain(|host| seen.insert(host.clone()));
        HostCycle { order, next: 0 }
    }

    /// Record that `host` accepted a connection.
    pub fn record_success(&self, host: &str) {
        if self.cache.get().as_deref() != Some(host) {
            tracing::debug!(host = %host, "caching successful host");
        }
        self.cache.put(host);
    }

    pub fn cached(&self) -> Option<String> {
        self.cache.get()
    }
}

/// One pass over the candidate hosts. Each host is yielded at most once.
#[derive(Debug, Clone)]
pub struct HostCycle {
    order: Vec<String>,
    next: usize,
}

impl HostCycle {
    /// Host most recently yielded.
    pub fn current(&self) -> Option<&str> {
        self.next
            .checked_sub(1)
            .and_then(|i| self.order.get(i))
            .map(String::as_str)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.order.len()
    }

    pub fn remaining(&self) -> usize {
        self.order.len().saturating_sub(self.next)
    }
}

impl Iterator for HostCycle {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let host = self.order.get(self.next).cloned();
        if host.is_some() {
            self.next += 1;
        }
        host
    }
}
