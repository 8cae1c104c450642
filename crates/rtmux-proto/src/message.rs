//! Protocol frames and channel messages.

use serde::{Deserialize, Serialize};

use crate::action::{Action, Flags};
use crate::error::ErrorInfo;
use crate::presence::PresenceMessage;

/// A message published on, or delivered from, a channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Event name used for subscription filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Publisher client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Publisher connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Payload encoding applied by the publisher, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Server timestamp in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    /// Create a named message with a payload.
    #[must_use]
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: Some(name.into()),
            data: Some(data),
            ..Self::default()
        }
    }
}

/// Connection parameters the server sends with CONNECTED.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// Resume key for this connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    /// Client id the server associated with the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// How long the server keeps connection state after a disconnect, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_ttl: Option<u64>,
    /// Largest message the server accepts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<u64>,
    /// Maximum interval between server heartbeats, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_interval: Option<u64>,
}

/// A protocol frame exchanged with the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    /// What this frame does.
    pub action: Action,
    /// Frame flags.
    #[serde(default, skip_serializing_if = "Flags::is_empty")]
    pub flags: Flags,
    /// Number of messages covered by an ACK or NACK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Error carried by ERROR, NACK, DISCONNECTED or DETACHED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Frame id (also the heartbeat id for pings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel the frame is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Channel serial; on SYNC frames this carries the sync cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_serial: Option<String>,
    /// Connection id (CONNECTED) or publishing connection id (MESSAGE/PRESENCE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Outbound message serial (MESSAGE/PRESENCE) or first acked serial (ACK/NACK).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<i64>,
    /// Server timestamp in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Channel messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Presence records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presence: Vec<PresenceMessage>,
    /// Connection parameters (CONNECTED only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
}

impl ProtocolMessage {
    /// Create an empty frame with the given action.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            flags: Flags::empty(),
            count: None,
            error: None,
            id: None,
            channel: None,
            channel_serial: None,
            connection_id: None,
            msg_serial: None,
            timestamp: None,
            messages: Vec::new(),
            presence: Vec::new(),
            connection_details: None,
        }
    }

    /// Create a channel-scoped frame.
    #[must_use]
    pub fn for_channel(action: Action, channel: impl Into<String>) -> Self {
        let mut msg = Self::new(action);
        msg.channel = Some(channel.into());
        msg
    }

    /// Create a MESSAGE frame carrying `messages` for `channel`.
    #[must_use]
    pub fn messages(channel: impl Into<String>, messages: Vec<Message>) -> Self {
        let mut msg = Self::for_channel(Action::Message, channel);
        msg.messages = messages;
        msg
    }

    /// Create a PRESENCE frame carrying `presence` for `channel`.
    #[must_use]
    pub fn presence(channel: impl Into<String>, presence: Vec<PresenceMessage>) -> Self {
        let mut msg = Self::for_channel(Action::Presence, channel);
        msg.presence = presence;
        msg
    }

    /// Create an ERROR frame.
    #[must_use]
    pub fn error(error: ErrorInfo) -> Self {
        let mut msg = Self::new(Action::Error);
        msg.error = Some(error);
        msg
    }

    /// Whether the frame has the given flag.
    #[must_use]
    pub fn has_flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    /// Server-supplied connection key, if any.
    #[must_use]
    pub fn connection_key(&self) -> Option<&str> {
        self.connection_details
            .as_ref()
            .and_then(|details| details.connection_key.as_deref())
    }

    /// Serials covered by an ACK/NACK: `msg_serial .. msg_serial + count`.
    ///
    /// `None` without a serial, or when the range does not fit in an `i64`.
    #[must_use]
    pub fn ack_range(&self) -> Option<std::ops::Range<i64>> {
        let first = self.msg_serial?;
        let count = i64::from(self.count.unwrap_or(1));
        Some(first..first.checked_add(count)?)
    }

    /// Stamp the frame with the current time if it has none.
    pub fn stamp_now(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now_millis());
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
