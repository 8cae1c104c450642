//! Protocol actions and frame flags.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// The action carried by a [`ProtocolMessage`](crate::ProtocolMessage).
///
/// Numeric values match the service wire protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    /// Keepalive / ping round trip.
    Heartbeat,
    /// Server acknowledges one or more published messages.
    Ack,
    /// Server rejects one or more published messages.
    Nack,
    /// Client requests a connection.
    Connect,
    /// Server confirms a connection.
    Connected,
    /// Client-initiated transient disconnect.
    Disconnect,
    /// Server reports a transient disconnect.
    Disconnected,
    /// Client requests a graceful close.
    Close,
    /// Server confirms a graceful close.
    Closed,
    /// Connection- or channel-scoped error.
    Error,
    /// Client requests a channel attach.
    Attach,
    /// Server confirms a channel attach.
    Attached,
    /// Client requests a channel detach.
    Detach,
    /// Server confirms (or forces) a channel detach.
    Detached,
    /// Presence records for a channel.
    Presence,
    /// Channel messages.
    Message,
    /// Presence sync records for a channel.
    Sync,
}

impl Action {
    /// Whether frames with this action occupy a message serial and expect an ack.
    #[must_use]
    pub const fn needs_ack(self) -> bool {
        matches!(self, Action::Message | Action::Presence)
    }

    /// Lowercase protocol name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Heartbeat => "heartbeat",
            Action::Ack => "ack",
            Action::Nack => "nack",
            Action::Connect => "connect",
            Action::Connected => "connected",
            Action::Disconnect => "disconnect",
            Action::Disconnected => "disconnected",
            Action::Close => "close",
            Action::Closed => "closed",
            Action::Error => "error",
            Action::Attach => "attach",
            Action::Attached => "attached",
            Action::Detach => "detach",
            Action::Detached => "detached",
            Action::Presence => "presence",
            Action::Message => "message",
            Action::Sync => "sync",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        match action {
            Action::Heartbeat => 0,
            Action::Ack => 1,
            Action::Nack => 2,
            Action::Connect => 3,
            Action::Connected => 4,
            Action::Disconnect => 5,
            Action::Disconnected => 6,
            Action::Close => 7,
            Action::Closed => 8,
            Action::Error => 9,
            Action::Attach => 10,
            Action::Attached => 11,
            Action::Detach => 12,
            Action::Detached => 13,
            Action::Presence => 14,
            Action::Message => 15,
            Action::Sync => 16,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = ProtocolError;

    // `Self::Error` would be ambiguous with `Action::Error`.
    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Action::Heartbeat,
            1 => Action::Ack,
            2 => Action::Nack,
            3 => Action::Connect,
            4 => Action::Connected,
            5 => Action::Disconnect,
            6 => Action::Disconnected,
            7 => Action::Close,
            8 => Action::Closed,
            9 => Action::Error,
            10 => Action::Attach,
            11 => Action::Attached,
            12 => Action::Detach,
            13 => Action::Detached,
            14 => Action::Presence,
            15 => Action::Message,
            16 => Action::Sync,
            other => return Err(ProtocolError::UnknownAction(other)),
        })
    }
}

/// Bit flags carried on ATTACHED and related frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u32);

impl Flags {
    /// The channel has presence members; a SYNC will follow.
    pub const HAS_PRESENCE: Flags = Flags(1 << 0);
    /// The channel has backlog messages queued for delivery.
    pub const HAS_BACKLOG: Flags = Flags(1 << 1);
    /// The attachment continued a previous one without loss.
    pub const RESUMED: Flags = Flags(1 << 2);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bits are set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Set every bit of `other`.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}
