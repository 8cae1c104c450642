//! Presence records.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// What a presence record says about a member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PresenceAction {
    /// Member is known to be absent (sync bookkeeping).
    Absent,
    /// Member is present (sent during sync).
    Present,
    /// Member entered.
    Enter,
    /// Member left.
    Leave,
    /// Member updated its data.
    Update,
}

impl PresenceAction {
    /// Whether the record removes the member from the set.
    #[must_use]
    pub const fn is_departure(self) -> bool {
        matches!(self, PresenceAction::Leave | PresenceAction::Absent)
    }
}

impl From<PresenceAction> for u8 {
    fn from(action: PresenceAction) -> u8 {
        match action {
            PresenceAction::Absent => 0,
            PresenceAction::Present => 1,
            PresenceAction::Enter => 2,
            PresenceAction::Leave => 3,
            PresenceAction::Update => 4,
        }
    }
}

impl TryFrom<u8> for PresenceAction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PresenceAction::Absent,
            1 => PresenceAction::Present,
            2 => PresenceAction::Enter,
            3 => PresenceAction::Leave,
            4 => PresenceAction::Update,
            other => return Err(ProtocolError::UnknownPresenceAction(other)),
        })
    }
}

impl std::fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PresenceAction::Absent => "absent",
            PresenceAction::Present => "present",
            PresenceAction::Enter => "enter",
            PresenceAction::Leave => "leave",
            PresenceAction::Update => "update",
        })
    }
}

/// A single presence record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    /// Unique record id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Presence action.
    pub action: PresenceAction,
    /// Client id of the member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Connection the member is present on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Arbitrary member data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Payload encoding applied by the publisher, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Server timestamp in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl PresenceMessage {
    /// Create a presence record for the given action and data.
    #[must_use]
    pub fn new(action: PresenceAction, data: Option<serde_json::Value>) -> Self {
        Self {
            id: None,
            action,
            client_id: None,
            connection_id: None,
            data,
            encoding: None,
            timestamp: None,
        }
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the connection id.
    #[must_use]
    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// Identity of the member this record describes: `connectionId:clientId`.
    ///
    /// A client id may be present on several connections; each is a distinct member.
    #[must_use]
    pub fn member_key(&self) -> String {
        format!(
            "{}:{}",
            self.connection_id.as_deref().unwrap_or_default(),
            self.client_id.as_deref().unwrap_or_default()
        )
    }
}
