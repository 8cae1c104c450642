//! Presence member map and the sync session that rebuilds it.
//!
//! The published map is what subscribers and `members()` see. A sync session
//! collects records into a provisional map; only `end_sync` makes them visible,
//! all at once. Point updates arriving during a sync apply to both maps.

use std::collections::BTreeMap;
use std::time::Duration;

use rtmux_proto::message::now_millis;
use rtmux_proto::{PresenceAction, PresenceMessage};
use tokio::time::Instant;

/// Member set for one channel.
#[derive(Debug, Default)]
pub struct PresenceMap {
    members: BTreeMap<String, PresenceMessage>,
    provisional: Option<BTreeMap<String, PresenceMessage>>,
    stale_since: Option<Instant>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the published members.
    pub fn members(&self) -> Vec<PresenceMessage> {
        self.members.values().cloned().collect()
    }

    pub fn get(&self, member_key: &str) -> Option<&PresenceMessage> {
        self.members.get(member_key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_syncing(&self) -> bool {
        self.provisional.is_some()
    }

    /// Begin a sync session, discarding any unfinished one.
    pub fn start_sync(&mut self) {
        self.provisional = Some(BTreeMap::new());
    }

    /// Apply sync records to the provisional map, last write wins per member.
    ///
    /// Starts a session if none is active.
    pub fn apply_sync(&mut self, records: impl IntoIterator<Item = PresenceMessage>) {
        let provisional = self.provisional.get_or_insert_with(BTreeMap::new);
        for record in records {
            provisional.insert(record.member_key(), record);
        }
    }

    /// Publish the provisional map.
    ///
    /// Members whose final record is a departure are dropped. Returns synthetic
    /// leave records for members of the old map that are gone from the new one.
    /// Without an active session this is a no-op.
    pub fn end_sync(&mut self) -> Vec<PresenceMessage> {
        let Some(provisional) = self.provisional.take() else {
            return Vec::new();
        };
        let next: BTreeMap<String, PresenceMessage> = provisional
            .into_iter()
            .filter(|(_, record)| !record.action.is_departure())
            .collect();
        let previous = std::mem::replace(&mut self.members, next);
        self.stale_since = None;
        previous
            .into_iter()
            .filter(|(key, _)| !self.members.contains_key(key))
            .map(|(_, record)| synthetic_leave(record))
            .collect()
    }

    /// Drop an unfinished sync session.
    pub fn abandon_sync(&mut self) {
        self.provisional = None;
    }

    /// Apply a point update from a PRESENCE frame.
    pub fn apply_point(&mut self, record: &PresenceMessage) {
        let key = record.member_key();
        if record.action.is_departure() {
            self.members.remove(&key);
        } else {
            self.members.insert(key.clone(), record.clone());
        }
        if let Some(provisional) = self.provisional.as_mut() {
            provisional.insert(key, record.clone());
        }
    }

    /// Remove every member, returning synthetic leaves for them.
    pub fn clear(&mut self) -> Vec<PresenceMessage> {
        self.provisional = None;
        self.stale_since = None;
        std::mem::take(&mut self.members)
            .into_values()
            .map(synthetic_leave)
            .collect()
    }

    /// The channel lost its attachment; the map may no longer be accurate.
    pub fn mark_stale(&mut self) {
        self.abandon_sync();
        if self.stale_since.is_none() {
            self.stale_since = Some(Instant::now());
        }
    }

    /// Whether the map has been stale for longer than `threshold`.
    pub fn stale_longer_than(&self, threshold: Duration) -> bool {
        self.stale_since
            .is_some_and(|since| since.elapsed() > threshold)
    }
}

fn synthetic_leave(mut record: PresenceMessage) -> PresenceMessage {
    record.action = PresenceAction::Leave;
    record.id = None;
    record.timestamp = Some(now_millis());
    record
}
