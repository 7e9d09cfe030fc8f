//! Process-wide room storage.
//!
//! [`RoomRegistry`] maps room ids to [`Room`]s behind a single
//! [`tokio::sync::RwLock`]. Join and leave take the write lock for the
//! whole transition, so capacity checks, role assignment, leave notices
//! and delete-on-empty are atomic with respect to each other. Relaying and
//! the `peer: joined` announcement only need the read lock.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::sync::mpsc;

use super::room::{Participant, Room};
use super::room_event::{PeerStatus, RoomEvent};
use super::{ConnectionId, Role, RoomId};
use crate::error::{RelayError, RoomError};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Room joined.
    pub room_id: RoomId,
    /// Identity of the joined connection.
    pub conn_id: ConnectionId,
    /// Role assigned on join.
    pub role: Role,
    /// Participants present before this one joined.
    pub peers: usize,
}

/// Central store for all live rooms.
///
/// Empty at startup. Rooms are created by the first join to an unknown id
/// and deleted by the leave that empties them; nothing else adds or
/// removes entries.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Joins a connection to `room_id`, creating the room if needed.
    ///
    /// The new participant's queue receives `welcome` before the lock is
    /// released. Other participants are not told yet: the caller announces
    /// the join with [`RoomRegistry::announce_joined`] once the handshake
    /// response has been written.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Full`] (as [`RelayError::RoomFull`]) if the room
    /// already holds two participants; the registry is not modified. Frame
    /// encoding failures are returned before any mutation as well.
    pub async fn join(
        &self,
        room_id: RoomId,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<Membership, RelayError> {
        let mut rooms = self.rooms.write().await;

        let peers = rooms.get(&room_id).map_or(0, Room::len);
        if rooms.get(&room_id).is_some_and(Room::is_full) {
            return Err(RoomError::Full(room_id).into());
        }
        let role = Role::for_occupancy(peers);

        let welcome = RoomEvent::Welcome {
            role,
            room_id: room_id.clone(),
            peers,
        }
        .to_frame()?;

        let room = get_or_create(&mut rooms, &room_id);
        let _ = outbound.try_send(welcome);
        room.push(Participant {
            conn_id,
            role,
            outbound,
        });

        tracing::info!(%room_id, %conn_id, %role, peers, "connection joined room");
        Ok(Membership {
            room_id,
            conn_id,
            role,
            peers,
        })
    }

    /// Queues `peer: joined` to every participant of `room_id` except
    /// `conn_id`.
    ///
    /// Returns the number of participants notified; `0` if `conn_id` is no
    /// longer in the room.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidMessage`] if the notice cannot be
    /// encoded.
    pub async fn announce_joined(
        &self,
        room_id: &RoomId,
        conn_id: ConnectionId,
    ) -> Result<usize, RelayError> {
        let joined = RoomEvent::Peer {
            status: PeerStatus::Joined,
        }
        .to_frame()?;
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return Ok(0);
        };
        if !room.participants().iter().any(|p| p.conn_id == conn_id) {
            return Ok(0);
        }
        Ok(room.broadcast(Some(conn_id), &joined))
    }

    /// Removes a connection from its room and notifies the remaining
    /// participant. Deletes the room if it is now empty.
    ///
    /// Returns `true` if the room was deleted.
    pub async fn leave(&self, room_id: &RoomId, conn_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        if room.remove(conn_id).is_none() {
            return false;
        }

        tracing::info!(%room_id, %conn_id, remaining = room.len(), "connection left room");
        if room.is_empty() {
            remove(&mut rooms, room_id);
            return true;
        }

        match (RoomEvent::Peer {
            status: PeerStatus::Left,
        })
        .to_frame()
        {
            Ok(left) => {
                room.broadcast(None, &left);
            }
            Err(err) => tracing::warn!(%room_id, error = %err, "failed to encode leave notice"),
        }
        false
    }

    /// Queues `frame` to every participant of `room_id` except `from`.
    ///
    /// Returns the number of participants reached; `0` if the room no
    /// longer exists.
    pub async fn broadcast(&self, room_id: &RoomId, from: ConnectionId, frame: &Bytes) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map_or(0, |room| room.broadcast(Some(from), frame))
    }

    /// Number of participants currently in `room_id` (0 if absent).
    pub async fn occupancy(&self, room_id: &RoomId) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, Room::len)
    }

    /// Roles of the participants of `room_id`, in join order.
    pub async fn roles(&self, room_id: &RoomId) -> Vec<Role> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.participants().iter().map(|p| p.role).collect())
            .unwrap_or_default()
    }

    /// Returns `true` if a room with this id exists.
    pub async fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Returns the number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Returns `true` if there are no live rooms.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the room for `room_id`, inserting an empty one first if absent.
/// Called with the write lock held.
fn get_or_create<'a>(rooms: &'a mut HashMap<RoomId, Room>, room_id: &RoomId) -> &'a mut Room {
    rooms.entry(room_id.clone()).or_insert_with(|| {
        tracing::info!(%room_id, "room created");
        Room::new(room_id.clone())
    })
}

/// Deletes an emptied room. Called with the write lock held, only from
/// [`RoomRegistry::leave`].
fn remove(rooms: &mut HashMap<RoomId, Room>, room_id: &RoomId) {
    if let Some(room) = rooms.remove(room_id) {
        let lifetime_ms = (chrono::Utc::now() - room.created_at).num_milliseconds();
        tracing::info!(%room_id, lifetime_ms, "room deleted");
    }
}
