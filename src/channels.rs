//! Channel registry.
//!
//! Channels are created on first use and live until released. The registry
//! also routes inbound channel frames and fans connection state changes out to
//! every channel.

use std::sync::Arc;

use dashmap::DashMap;
use rtmux_proto::ProtocolMessage;

use crate::channel::{DetachPolicy, RealtimeChannel};
use crate::connection::{ConnectionInner, ConnectionStateChange};
use crate::error::Result;

struct ChannelsInner {
    map: DashMap<String, RealtimeChannel>,
    connection: Arc<ConnectionInner>,
}

/// All channels of one client.
#[derive(Clone)]
pub struct Channels {
    inner: Arc<ChannelsInner>,
}

impl Channels {
    pub(crate) fn new(connection: Arc<ConnectionInner>) -> Self {
        Self {
            inner: Arc::new(ChannelsInner {
                map: DashMap::new(),
                connection,
            }),
        }
    }

    /// The channel named `name`, created if it does not exist.
    pub fn get(&self, name: &str) -> RealtimeChannel {
        if let Some(channel) = self.inner.map.get(name) {
            return channel.clone();
        }
        self.inner
            .map
            .entry(name.to_string())
            .or_insert_with(|| RealtimeChannel::new(name, self.inner.connection.clone()))
            .clone()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.map.contains_key(name)
    }

    /// Detach the channel and forget it. Queued messages are discarded.
    ///
    /// Existing handles keep working but are no longer routed to.
    pub fn release(&self, name: &str) -> Result<()> {
        let Some((_, channel)) = self.inner.map.remove(name) else {
            return Ok(());
        };
        channel.detach_with(DetachPolicy::Drop)
    }

    /// Names of all channels, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.map.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Deliver a channel-scoped frame to its channel.
    pub(crate) fn route(&self, frame: ProtocolMessage) {
        let Some(name) = frame.channel.as_deref() else {
            tracing::debug!(action = %frame.action, "channel frame without a channel name");
            return;
        };
        // Clone out so no shard lock is held while the channel runs listeners.
        let channel = self.inner.map.get(name).map(|c| c.clone());
        match channel {
            Some(channel) => channel.handle_frame(frame),
            None => tracing::debug!(channel = name, action = %frame.action, "frame for unknown channel"),
        }
    }

    pub(crate) fn on_connection_change(&self, change: &ConnectionStateChange, resumed: bool) {
        let channels: Vec<RealtimeChannel> =
            self.inner.map.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.on_connection_change(change, resumed);
        }
    }
}

impl std::fmt::Debug for Channels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channels")
            .field("names", &self.names())
            .finish()
    }
}
