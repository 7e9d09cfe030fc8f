//! Room state: the ordered participants of one two-player session.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{ConnectionId, Role, RoomId};

/// Maximum number of participants in a room.
pub const MAX_PARTICIPANTS: usize = 2;

/// One joined connection as seen by its room.
///
/// The room holds only the sending half of the connection's outbound
/// queue; the socket itself is owned by the connection task.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Connection identity.
    pub conn_id: ConnectionId,
    /// Role fixed at join time.
    pub role: Role,
    /// Outbound queue of encoded frames for this connection.
    pub outbound: mpsc::Sender<Bytes>,
}

/// A room and its participants, in join order.
#[derive(Debug)]
pub struct Room {
    /// Room identifier (immutable after creation).
    pub room_id: RoomId,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    participants: Vec<Participant>,
}

impl Room {
    /// Creates an empty room.
    #[must_use]
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            created_at: Utc::now(),
            participants: Vec::with_capacity(MAX_PARTICIPANTS),
        }
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns `true` if the room has no participants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Returns `true` if no further participant may join.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= MAX_PARTICIPANTS
    }

    /// Participants in join order.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Appends a participant. Capacity is checked by the caller.
    pub(crate) fn push(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    /// Removes the participant with the given id.
    pub(crate) fn remove(&mut self, conn_id: ConnectionId) -> Option<Participant> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.conn_id == conn_id)?;
        Some(self.participants.remove(idx))
    }

    /// Queues `frame` to every participant except `except`.
    ///
    /// Best-effort: a participant whose queue is full or closed misses the
    /// frame. Returns the number of participants the frame was queued for.
    pub fn broadcast(&self, except: Option<ConnectionId>, frame: &Bytes) -> usize {
        let mut delivered = 0;
        for participant in &self.participants {
            if Some(participant.conn_id) == except {
                continue;
            }
            match participant.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        room_id = %self.room_id,
                        conn_id = %participant.conn_id,
                        "outbound queue full, dropping frame"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}
