//! Connection states and state-change events.

use std::time::Duration;

use rtmux_proto::ErrorInfo;

/// Lifecycle state of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Constructed, not yet connecting.
    #[default]
    Initialized,
    /// Opening a link or waiting for CONNECTED.
    Connecting,
    /// Handshake complete.
    Connected,
    /// Link lost; a retry is scheduled and the resume key is kept.
    Disconnected,
    /// Retries exhausted the threshold; retrying at a fixed, longer interval.
    Suspended,
    /// Explicit close in progress.
    Closing,
    /// Closed by the application.
    Closed,
    /// Terminal until an explicit `connect()`.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Suspended => "suspended",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Whether publishes are accepted, transmitted or queued, in this state.
    pub fn accepts_publish(&self, queue_messages: bool) -> bool {
        match self {
            Self::Connected => true,
            Self::Initialized | Self::Connecting | Self::Disconnected => queue_messages,
            Self::Suspended | Self::Closing | Self::Closed | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kinds emitted by the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
    /// Connection details changed without a state change.
    Update,
}

impl From<ConnectionState> for ConnectionEvent {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Initialized => Self::Initialized,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Suspended => Self::Suspended,
            ConnectionState::Closing => Self::Closing,
            ConnectionState::Closed => Self::Closed,
            ConnectionState::Failed => Self::Failed,
        }
    }
}

/// Payload of every connection event.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub event: ConnectionEvent,
    /// Why the transition happened, if it was caused by an error.
    pub reason: Option<ErrorInfo>,
    /// Delay until the next connection attempt, for disconnected and suspended.
    pub retry_in: Option<Duration>,
}

impl ConnectionStateChange {
    pub(crate) fn transition(
        previous: ConnectionState,
        current: ConnectionState,
        reason: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) -> Self {
        Self {
            previous,
            current,
            event: current.into(),
            reason,
            retry_in,
        }
    }

    pub(crate) fn update(state: ConnectionState, reason: Option<ErrorInfo>) -> Self {
        Self {
            previous: state,
            current: state,
            event: ConnectionEvent::Update,
            reason,
            retry_in: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_admission() {
        assert!(ConnectionState::Connected.accepts_publish(false));
        assert!(ConnectionState::Disconnected.accepts_publish(true));
        assert!(!ConnectionState::Disconnected.accepts_publish(false));
        assert!(!ConnectionState::Suspended.accepts_publish(true));
        assert!(!ConnectionState::Closed.accepts_publish(true));
    }

    #[test]
    fn test_transition_event_matches_state() {
        let change = ConnectionStateChange::transition(
            ConnectionState::Connecting,
            ConnectionState::Connected,
            None,
            None,
        );
        assert_eq!(change.event, ConnectionEvent::Connected);
        assert_eq!(
            ConnectionStateChange::update(ConnectionState::Connected, None).event,
            ConnectionEvent::Update
        );
        assert_eq!(ConnectionState::Suspended.to_string(), "suspended");
    }
}
