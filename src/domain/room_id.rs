//! Room identifier.
//!
//! [`RoomId`] is a newtype around the opaque string a client names in the
//! `room` query parameter, or a short random id generated by the server.
//!
//! Generated ids come from a non-cryptographic PRNG. They are guessable
//! and must not be treated as capability tokens: anyone who knows or
//! guesses an id can join that room while it has a free slot.

use std::fmt;

use serde::Serialize;

/// Length of a server-generated room id.
pub const GENERATED_LEN: usize = 6;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Identifier of a relay room.
///
/// Used as the key in [`super::RoomRegistry`] and echoed back to clients
/// in the `welcome` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Generates a random 6-character lowercase-alphanumeric id.
    ///
    /// Ids are not reserved: two concurrent generations may collide, in
    /// which case both connections land in the same room.
    #[must_use]
    pub fn generate() -> Self {
        let id = (0..GENERATED_LEN)
            .map(|_| {
                let idx = fastrand::usize(..ALPHABET.len());
                ALPHABET.get(idx).map_or('0', |b| char::from(*b))
            })
            .collect();
        Self(id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_lowercase_alphanumeric() {
        for _ in 0..100 {
            let id = RoomId::generate();
            assert_eq!(id.as_str().len(), GENERATED_LEN);
            assert!(
                id.as_str()
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            );
        }
    }

    #[test]
    fn display_is_raw_string() {
        let id = RoomId::from("lobby-7");
        assert_eq!(id.to_string(), "lobby-7");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&RoomId::from("abc")).ok();
        assert_eq!(json.as_deref(), Some("\"abc\""));
    }
}
