//! Unified error handling for rtmux.
//!
//! Every failure the engine reports is an [`Error`]. Each variant belongs to one
//! [`ErrorKind`], carries a stable label ([`Error::error_code`]) and a numeric
//! service code ([`Error::code`]).

use std::time::Duration;

use rtmux_proto::{ErrorInfo, codes};
use thiserror::Error;

use crate::transport::TransportError;

/// Result alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ============================================================================
// Categories
// ============================================================================

/// Error taxonomy used to decide retry and propagation behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or endpoint trouble; drives backoff and fallback.
    TransientNetwork,
    /// The server refused the operation; not retried with the same parameters.
    ProtocolRejection,
    /// The credential is no longer valid; triggers renewal and one retry.
    AuthInvalid,
    /// Messages may have been lost or duplicated across a reconnect.
    ContinuityLost,
    /// The caller violated a precondition; never retried.
    LocalMisuse,
    /// A caller's wait expired. The underlying transition continues.
    Timeout,
    /// A caller's wait was cancelled. The underlying transition continues.
    Cancelled,
    /// The connection reached a terminal state.
    Terminal,
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Errors surfaced by the connection, channels and presence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("server rejected request: {0}")]
    Rejected(ErrorInfo),

    #[error("credentials rejected: {0}")]
    AuthInvalid(ErrorInfo),

    #[error("credential renewal failed: {0}")]
    AuthRenewal(String),

    #[error("continuity lost: {0}")]
    ContinuityLost(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("retry budget of {0:?} exhausted")]
    RetryExhausted(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel {0} detached")]
    ChannelDetached(String),

    #[error("channel {channel} failed: {reason}")]
    ChannelFailed { channel: String, reason: String },

    #[error("channel {channel} queue is full ({limit} messages)")]
    QueueFull { channel: String, limit: usize },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("a client id is required to {0}")]
    MissingClientId(&'static str),

    #[error("message discarded: {0}")]
    Discarded(String),

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    #[error("invalid client options: {0}")]
    InvalidOptions(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{0} cancelled")]
    Cancelled(&'static str),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::Rejected(info)) => classify_info(info),
            Self::Transport(_) => ErrorKind::TransientNetwork,
            Self::Rejected(_) => ErrorKind::ProtocolRejection,
            Self::AuthInvalid(_) | Self::AuthRenewal(_) => ErrorKind::AuthInvalid,
            Self::ContinuityLost(_) => ErrorKind::ContinuityLost,
            Self::ConnectionFailed(_)
            | Self::RetryExhausted(_)
            | Self::ConnectionClosed
            | Self::ChannelDetached(_)
            | Self::ChannelFailed { .. } => ErrorKind::Terminal,
            Self::QueueFull { .. }
            | Self::InvalidState { .. }
            | Self::MissingClientId(_)
            | Self::Discarded(_)
            | Self::NoRuntime
            | Self::InvalidOptions(_) => ErrorKind::LocalMisuse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Get a static error code string for log and metric labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::AuthInvalid(_) => "auth_invalid",
            Self::AuthRenewal(_) => "auth_renewal",
            Self::ContinuityLost(_) => "continuity_lost",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::RetryExhausted(_) => "retry_exhausted",
            Self::ConnectionClosed => "connection_closed",
            Self::ChannelDetached(_) => "channel_detached",
            Self::ChannelFailed { .. } => "channel_failed",
            Self::QueueFull { .. } => "queue_full",
            Self::InvalidState { .. } => "invalid_state",
            Self::MissingClientId(_) => "missing_client_id",
            Self::Discarded(_) => "discarded",
            Self::NoRuntime => "no_runtime",
            Self::InvalidOptions(_) => "invalid_options",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Numeric service code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Transport(TransportError::Rejected(info))
            | Self::Rejected(info)
            | Self::AuthInvalid(info) => info.code,
            Self::Transport(_) => codes::DISCONNECTED,
            Self::AuthRenewal(_) => codes::AUTH_RENEWAL_FAILED,
            Self::ContinuityLost(_) => codes::CONTINUITY_LOST,
            Self::ConnectionFailed(_) | Self::RetryExhausted(_) => codes::CONNECTION_FAILED,
            Self::ConnectionClosed => codes::CONNECTION_CLOSED,
            Self::ChannelDetached(_) => codes::CHANNEL_DETACHED,
            Self::ChannelFailed { .. } => codes::CHANNEL_OPERATION_FAILED,
            Self::QueueFull { .. } => codes::QUEUE_FULL,
            Self::InvalidState { .. } | Self::MissingClientId(_) | Self::NoRuntime => {
                codes::INVALID_STATE
            }
            Self::Discarded(_) => codes::CHANNEL_OPERATION_FAILED,
            Self::InvalidOptions(_) => codes::BAD_REQUEST,
            Self::Timeout { .. } | Self::Cancelled(_) => codes::TIMEOUT,
        }
    }

    /// Whether the connection should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::AuthInvalid
        )
    }

    /// Build an error from a server-sent record.
    pub fn from_info(info: ErrorInfo) -> Self {
        match classify_info(&info) {
            ErrorKind::AuthInvalid => Self::AuthInvalid(info),
            ErrorKind::TransientNetwork => Self::Transport(TransportError::Rejected(info)),
            _ => Self::Rejected(info),
        }
    }

    /// The error as a wire record, for attaching to state changes.
    pub fn to_info(&self) -> ErrorInfo {
        match self {
            Self::Transport(TransportError::Rejected(info))
            | Self::Rejected(info)
            | Self::AuthInvalid(info) => info.clone(),
            other => ErrorInfo::new(other.code(), 0, other.to_string()),
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

fn classify_info(info: &ErrorInfo) -> ErrorKind {
    if info.is_token_error() {
        ErrorKind::AuthInvalid
    } else if info.is_fatal() {
        ErrorKind::ProtocolRejection
    } else {
        ErrorKind::TransientNetwork
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(info) => Self::from_info(info),
            other => Self::Transport(other),
        }
    }
}
