//! Channel presence: entering, leaving and watching the member set.

mod sync;

pub use sync::PresenceMap;

use rtmux_proto::{PresenceAction, PresenceMessage};
use serde_json::Value;

use crate::channel::RealtimeChannel;
use crate::emitter::Subscription;
use crate::error::Result;
use crate::queue::PublishHandle;
use crate::wait::Wait;

/// Presence operations for one channel.
///
/// Enter, update and leave act for the client's configured `client_id` and
/// attach the channel if needed.
pub struct Presence<'a> {
    channel: &'a RealtimeChannel,
}

impl<'a> Presence<'a> {
    pub(crate) fn new(channel: &'a RealtimeChannel) -> Self {
        Self { channel }
    }

    pub fn enter(&self, data: Option<Value>) -> Result<PublishHandle> {
        self.channel.presence_send(PresenceAction::Enter, data)
    }

    pub fn update(&self, data: Option<Value>) -> Result<PublishHandle> {
        self.channel.presence_send(PresenceAction::Update, data)
    }

    pub fn leave(&self, data: Option<Value>) -> Result<PublishHandle> {
        self.channel.presence_send(PresenceAction::Leave, data)
    }

    /// Members as currently known, without waiting for a sync.
    pub fn members(&self) -> Vec<PresenceMessage> {
        self.channel.presence_members()
    }

    /// Members once the channel is attached and the sync has completed.
    pub async fn get(&self, wait: Wait) -> Result<Vec<PresenceMessage>> {
        self.channel.presence_get(wait).await
    }

    /// Listen for presence records with `action`, or all records with `None`.
    pub fn subscribe(
        &self,
        action: Option<PresenceAction>,
        listener: impl Fn(&PresenceMessage) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.channel.presence_subscribe(action, listener)
    }

    pub fn is_syncing(&self) -> bool {
        self.channel.presence_syncing()
    }
}
