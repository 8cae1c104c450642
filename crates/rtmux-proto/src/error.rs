//! Error types for the protocol library.
//!
//! [`ErrorInfo`] is the error record the service puts on the wire. [`ProtocolError`]
//! covers local failures to interpret a frame.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Numeric error codes used by the service and by the engine.
pub mod codes {
    /// Generic bad request.
    pub const BAD_REQUEST: u32 = 40000;
    /// Caller violated an operation precondition.
    pub const INVALID_STATE: u32 = 40001;
    /// Credentials missing or malformed.
    pub const UNAUTHORIZED: u32 = 40100;
    /// First code of the token error range.
    pub const TOKEN_ERROR_FIRST: u32 = 40140;
    /// Token expired.
    pub const TOKEN_EXPIRED: u32 = 40142;
    /// Last code of the token error range.
    pub const TOKEN_ERROR_LAST: u32 = 40149;
    /// Client lacks permission for the operation.
    pub const PERMISSION_DENIED: u32 = 40160;
    /// Request timed out.
    pub const TIMEOUT: u32 = 50003;
    /// Connection failed.
    pub const CONNECTION_FAILED: u32 = 80000;
    /// Connection suspended.
    pub const CONNECTION_SUSPENDED: u32 = 80002;
    /// Connection disconnected.
    pub const DISCONNECTED: u32 = 80003;
    /// Auth renewal failed.
    pub const AUTH_RENEWAL_FAILED: u32 = 80019;
    /// Operation failed because the connection is closed.
    pub const CONNECTION_CLOSED: u32 = 80017;
    /// Continuity of the connection could not be preserved.
    pub const CONTINUITY_LOST: u32 = 80008;
    /// Channel operation failed.
    pub const CHANNEL_OPERATION_FAILED: u32 = 90001;
    /// Channel detached.
    pub const CHANNEL_DETACHED: u32 = 90006;
    /// Channel queue exceeded its limit.
    pub const QUEUE_FULL: u32 = 90010;
}

/// An error record as carried by ERROR, NACK, DISCONNECTED and DETACHED frames.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Service error code (for example `40142` for an expired token).
    pub code: u32,
    /// HTTP-equivalent status code.
    #[serde(default)]
    pub status_code: u16,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// Create an error record.
    #[must_use]
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
        }
    }

    /// Whether this error signals that the current credential is no longer valid.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        (codes::TOKEN_ERROR_FIRST..=codes::TOKEN_ERROR_LAST).contains(&self.code)
    }

    /// Whether the server considers the failure permanent for the same parameters.
    ///
    /// 4xx statuses are the client's fault; 5xx and unset statuses are retryable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        (400..500).contains(&self.status_code) && !self.is_token_error()
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} (status {})",
            self.code, self.message, self.status_code
        )
    }
}

impl std::error::Error for ErrorInfo {}

/// Top-level protocol errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Frame carried an action number this library does not know.
    #[error("unknown protocol action: {0}")]
    UnknownAction(u8),

    /// Frame carried a presence action number this library does not know.
    #[error("unknown presence action: {0}")]
    UnknownPresenceAction(u8),

    /// A required field was missing for the frame's action.
    #[error("{action} frame missing field `{field}`")]
    MissingField {
        /// The frame action.
        action: &'static str,
        /// The missing field.
        field: &'static str,
    },
}
