//! Server-to-client messages emitted by room transitions and relaying.
//!
//! Every [`RoomEvent`] is serialized as a JSON object tagged by `type` and
//! sent to clients as a single text frame.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::{Role, RoomId};
use crate::error::RelayError;
use crate::ws::frame::encode_text;

/// Presence change reported to the participants already in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// Another connection joined the room.
    Joined,
    /// A connection left the room.
    Left,
}

/// Message sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// First message on every new connection.
    Welcome {
        /// Role assigned to the receiving connection.
        role: Role,
        /// Room the connection joined.
        #[serde(rename = "roomId")]
        room_id: RoomId,
        /// Participants already present before this one (0 or 1).
        peers: usize,
    },

    /// Presence notification for the other participant.
    Peer {
        /// Whether a peer joined or left.
        status: PeerStatus,
    },

    /// Guest input relayed to the host.
    Input {
        /// Opaque input object.
        input: Value,
    },

    /// Host state relayed to the guest.
    State {
        /// Opaque state object.
        state: Value,
    },
}

impl RoomEvent {
    /// Serializes the event and wraps it in a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidMessage`] if serialization fails, or
    /// [`RelayError::FrameDecode`] if the JSON is too long for one frame.
    pub fn to_frame(&self) -> Result<Bytes, RelayError> {
        let json = serde_json::to_string(self)?;
        Ok(encode_text(&json)?)
    }
}
