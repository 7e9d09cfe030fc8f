//! Domain layer: identifiers, roles, rooms, and the room registry.
//!
//! This module holds the server-side model of a relay session: which
//! connections share a room, which role each one plays, and the events the
//! relay emits when membership changes or a message is forwarded.

pub mod connection_id;
pub mod role;
pub mod room;
pub mod room_event;
pub mod room_id;
pub mod room_registry;

pub use connection_id::ConnectionId;
pub use role::Role;
pub use room::{MAX_PARTICIPANTS, Participant, Room};
pub use room_event::{PeerStatus, RoomEvent};
pub use room_id::RoomId;
pub use room_registry::{Membership, RoomRegistry};
