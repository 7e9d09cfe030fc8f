//! Relay error types with per-connection fatality mapping.
//!
//! [`RelayError`] is the central error type for the relay. Each variant
//! says whether the connection that produced it must be torn down and,
//! for handshake-time failures, which HTTP status (if any) is written
//! back before the transport is closed.

use crate::domain::RoomId;

/// Failures while reading or validating the HTTP upgrade request.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The upgrade request carried no `Sec-WebSocket-Key` header.
    #[error("upgrade request is missing Sec-WebSocket-Key")]
    MissingKey,

    /// The request line or a header line could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The request head exceeded the configured size limit.
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Configured maximum head size in bytes.
        limit: usize,
    },

    /// The peer closed the stream before sending a complete request head.
    #[error("connection closed before request head was complete")]
    ClosedEarly,
}

/// Failures of the frame codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payload length does not fit the supported 32-bit range.
    #[error("unsupported payload length {0}")]
    UnsupportedLength(u64),

    /// Declared payload length exceeds the connection's frame limit.
    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured maximum payload length.
        limit: usize,
    },
}

/// Failures of room membership operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    /// The room already holds its maximum number of participants.
    #[error("room {0} is full")]
    Full(RoomId),
}

/// Relay-side error enum.
///
/// # Fatality
///
/// | Variant          | Connection outcome                          |
/// |------------------|---------------------------------------------|
/// | `Handshake`      | closed without a response                   |
/// | `RoomFull`       | `429 Too Many Requests`, then closed        |
/// | `FrameDecode`    | closed, leave-cleanup runs                  |
/// | `InvalidMessage` | message dropped, connection stays open      |
/// | `Transport`      | closed, leave-cleanup runs                  |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Upgrade request rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Target room already has two participants.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// Frame could not be decoded from the byte stream.
    #[error("frame decode error: {0}")]
    FrameDecode(#[from] FrameError),

    /// Text frame payload was not a recognised message.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Underlying stream failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl From<RoomError> for RelayError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::Full(room_id) => Self::RoomFull(room_id),
        }
    }
}

impl RelayError {
    /// Returns `true` if the connection must be closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidMessage(_))
    }

    /// Returns the HTTP status written back before closing, if any.
    ///
    /// Only meaningful during the handshake; every other failure closes the
    /// transport silently.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::RoomFull(_) => Some(429),
            Self::Handshake(_)
            | Self::FrameDecode(_)
            | Self::InvalidMessage(_)
            | Self::Transport(_) => None,
        }
    }
}
