//! Client-to-server message types.
//!
//! Text frames are parsed once, at the decode boundary, into the closed
//! [`ClientMessage`] union. Anything that does not match a known `type`
//! fails to parse and is dropped by the caller.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{Role, RoomEvent};
use crate::error::RelayError;

/// Messages a client may send over a text frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Guest controller input, forwarded to the host.
    Input {
        /// Opaque input object. Missing or `null` is relayed as `{}`.
        #[serde(default)]
        input: Option<Value>,
    },
    /// Host game state, forwarded to the guest.
    State {
        /// Opaque state object. Missing or `null` is relayed as `{}`.
        #[serde(default)]
        state: Option<Value>,
    },
}

impl ClientMessage {
    /// Parses a text frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidMessage`] for invalid JSON or an
    /// unrecognised `type`.
    pub fn from_json(payload: &[u8]) -> Result<Self, RelayError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Converts the message into the event relayed to peers, or `None` if
    /// `sender` is not allowed to emit it.
    #[must_use]
    pub fn into_relay(self, sender: Role) -> Option<RoomEvent> {
        match self {
            Self::Input { input } if sender.may_send_input() => Some(RoomEvent::Input {
                input: input.unwrap_or_else(empty_object),
            }),
            Self::State { state } if sender.may_send_state() => Some(RoomEvent::State {
                state: state.unwrap_or_else(empty_object),
            }),
            Self::Input { .. } | Self::State { .. } => None,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
