//! Presence sync cursor.
//!
//! SYNC frames carry a channel serial of the form `<sequence>:<cursor>`. An empty
//! cursor marks the last frame of the sync. A SYNC frame with no channel serial at
//! all is a complete single-frame sync.

/// Parsed position within a presence sync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    /// Sync sequence id, shared by every frame of one sync.
    pub sequence: String,
    /// Opaque position; empty on the final frame.
    pub cursor: String,
}

impl SyncCursor {
    /// Parse a SYNC frame's channel serial.
    ///
    /// Returns `None` when the frame carries no serial, which means the frame is
    /// a whole sync on its own.
    #[must_use]
    pub fn parse(channel_serial: Option<&str>) -> Option<Self> {
        let serial = channel_serial?;
        let (sequence, cursor) = serial.split_once(':').unwrap_or((serial, ""));
        Some(Self {
            sequence: sequence.to_string(),
            cursor: cursor.to_string(),
        })
    }

    /// Whether this frame ends the sync.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.cursor.is_empty()
    }
}

/// Whether a SYNC frame with the given channel serial ends the sync.
#[must_use]
pub fn is_sync_end(channel_serial: Option<&str>) -> bool {
    SyncCursor::parse(channel_serial).is_none_or(|cursor| cursor.is_last())
}
