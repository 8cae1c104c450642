//! Channel states and state-change events.

use rtmux_proto::ErrorInfo;

use crate::error::Error;

/// Attach lifecycle of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    #[default]
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    /// The connection dropped while attached or attaching.
    Suspended,
    Failed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kinds emitted by a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
    /// Attachment changed without a state change, e.g. continuity was lost.
    Update,
}

impl From<ChannelState> for ChannelEvent {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Initialized => Self::Initialized,
            ChannelState::Attaching => Self::Attaching,
            ChannelState::Attached => Self::Attached,
            ChannelState::Detaching => Self::Detaching,
            ChannelState::Detached => Self::Detached,
            ChannelState::Suspended => Self::Suspended,
            ChannelState::Failed => Self::Failed,
        }
    }
}

/// Payload of every channel event.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStateChange {
    pub previous: ChannelState,
    pub current: ChannelState,
    pub event: ChannelEvent,
    pub reason: Option<ErrorInfo>,
    /// `true` when the server confirmed no messages were lost.
    pub resumed: bool,
}

impl ChannelStateChange {
    /// A continuity break: the channel may have missed or will see duplicate messages.
    pub fn is_continuity_break(&self) -> bool {
        self.event == ChannelEvent::Update && !self.resumed
    }

    pub(crate) fn update(state: ChannelState, reason: Option<ErrorInfo>, resumed: bool) -> Self {
        Self {
            previous: state,
            current: state,
            event: ChannelEvent::Update,
            reason,
            resumed,
        }
    }
}

/// What happens to messages still queued on a channel when it is detached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DetachPolicy {
    /// Resolve them with [`Error::Discarded`].
    Drop,
    /// Resolve them with [`Error::ChannelDetached`].
    #[default]
    Fail,
}

impl DetachPolicy {
    pub(crate) fn error(self, channel: &str) -> Error {
        match self {
            Self::Drop => Error::Discarded(format!("channel {channel} detached")),
            Self::Fail => Error::ChannelDetached(channel.to_string()),
        }
    }
}

/// State and presence readiness, published through a watch channel for waiters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct ChannelStatus {
    pub state: ChannelState,
    pub presence_synced: bool,
}
