//! Participant roles and the routing rule they gate.

use std::fmt;

use serde::Serialize;

/// Role of a connection inside its room, fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// First participant of a room. Authoritative for game state.
    Host,
    /// Second participant. Sends its inputs to the host.
    Guest,
}

impl Role {
    /// Role assigned to a connection joining a room that already holds
    /// `occupants` participants.
    #[must_use]
    pub const fn for_occupancy(occupants: usize) -> Self {
        if occupants == 0 { Self::Host } else { Self::Guest }
    }

    /// Whether this role may emit `input` messages.
    #[must_use]
    pub const fn may_send_input(self) -> bool {
        matches!(self, Self::Guest)
    }

    /// Whether this role may emit `state` messages.
    #[must_use]
    pub const fn may_send_state(self) -> bool {
        matches!(self, Self::Host)
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
