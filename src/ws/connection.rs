//! Relay engine: per-connection state machine.
//!
//! Drains one upgraded stream through the frame codec, answers control
//! frames, relays role-gated messages to the other participant, and runs
//! leave-cleanup when the connection ends for any reason.
//!
//! Each connection owns two tasks: the read loop (this module's
//! [`Connection::run`]) and a writer task draining the connection's
//! outbound queue. Everything written to the socket after the handshake,
//! including pongs and the close echo, goes through that queue, so frames
//! reach the wire in the order they were queued.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::frame::{self, Frame, FrameBuffer, Opcode};
use super::messages::ClientMessage;
use crate::domain::{Membership, RoomRegistry};
use crate::error::RelayError;

/// Lifecycle of a joined connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Joined to its room; the `101` response is not yet written.
    Connecting,
    /// Handshake complete; frames are being relayed.
    Open,
    /// Terminal. The connection has left its room.
    Closed,
}

/// Why the read loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame.
    CloseFrame,
    /// Client closed the TCP stream.
    Eof,
}

/// Whether to keep reading after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One joined connection.
#[derive(Debug)]
pub struct Connection {
    membership: Membership,
    state: ConnectionState,
    frames: FrameBuffer,
    outbound: mpsc::Sender<Bytes>,
    registry: Arc<RoomRegistry>,
}

impl Connection {
    /// Wraps a connection that has just joined a room.
    ///
    /// `leftover` holds bytes read together with the request head.
    #[must_use]
    pub fn new(
        membership: Membership,
        leftover: BytesMut,
        max_frame_bytes: usize,
        outbound: mpsc::Sender<Bytes>,
        registry: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            membership,
            state: ConnectionState::Connecting,
            frames: FrameBuffer::with_leftover(leftover, max_frame_bytes),
            outbound,
            registry,
        }
    }

    /// Room membership of this connection.
    #[must_use]
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Marks the handshake as complete and tells the other participant,
    /// if any, that this connection joined.
    ///
    /// Only the first call announces; later calls do nothing.
    pub async fn open(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.state = ConnectionState::Open;
        let Membership {
            room_id, conn_id, ..
        } = &self.membership;
        if let Err(err) = self.registry.announce_joined(room_id, *conn_id).await {
            tracing::warn!(%room_id, %conn_id, error = %err, "failed to announce join");
        }
    }

    /// Leaves the room. Idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.registry
            .leave(&self.membership.room_id, self.membership.conn_id)
            .await;
    }

    /// Runs the connection to completion over `stream`.
    ///
    /// `outbound_rx` is the receiving half of the queue whose sender was
    /// registered in the room. Leave-cleanup always runs before this
    /// returns, and queued frames are flushed before the stream is shut
    /// down.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the connection: a frame decode
    /// failure or a transport error.
    pub async fn run<S>(
        mut self,
        stream: S,
        outbound_rx: mpsc::Receiver<Bytes>,
    ) -> Result<CloseReason, RelayError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.open().await;
        let (mut reader, writer) = tokio::io::split(stream);
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

        let result = self.read_loop(&mut reader).await;

        let conn_id = self.membership.conn_id;
        let room_id = self.membership.room_id.clone();
        self.close().await;
        drop(self);
        match writer_task.await {
            Ok(Err(err)) => tracing::debug!(%conn_id, error = %err, "writer stopped"),
            Err(err) => tracing::warn!(%conn_id, error = %err, "writer task failed"),
            Ok(Ok(())) => {}
        }

        match &result {
            Ok(reason) => tracing::debug!(%room_id, %conn_id, ?reason, "connection closed"),
            Err(err) => tracing::debug!(%room_id, %conn_id, error = %err, "connection failed"),
        }
        result
    }

    async fn read_loop<R>(&mut self, reader: &mut R) -> Result<CloseReason, RelayError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            while let Some(frame) = self.frames.next_frame()? {
                if self.dispatch(frame).await? == Flow::Close {
                    return Ok(CloseReason::CloseFrame);
                }
            }
            if reader.read_buf(self.frames.buf_mut()).await? == 0 {
                return Ok(CloseReason::Eof);
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, RelayError> {
        match frame.opcode {
            Opcode::Text => match self.relay_text(&frame.payload).await {
                Err(err) if !err.is_fatal() => {
                    let Membership {
                        room_id, conn_id, ..
                    } = &self.membership;
                    tracing::trace!(%room_id, %conn_id, error = %err, "dropping invalid message");
                    Ok(Flow::Continue)
                }
                other => other.map(|()| Flow::Continue),
            },
            Opcode::Ping => {
                self.send(frame::encode(&frame.payload, Opcode::Pong)?).await?;
                Ok(Flow::Continue)
            }
            Opcode::Close => {
                self.send(frame::encode(&frame.payload, Opcode::Close)?).await?;
                Ok(Flow::Close)
            }
            Opcode::Binary
            | Opcode::Continuation
            | Opcode::Pong
            | Opcode::Reserved(_) => Ok(Flow::Continue),
        }
    }

    /// Parses a text payload and forwards it if the sender's role allows.
    /// Role-mismatched messages are dropped here; malformed or unknown ones
    /// come back as [`RelayError::InvalidMessage`].
    async fn relay_text(&self, payload: &[u8]) -> Result<(), RelayError> {
        let Membership {
            room_id,
            conn_id,
            role,
            ..
        } = &self.membership;

        let message = ClientMessage::from_json(payload)?;
        let Some(event) = message.into_relay(*role) else {
            tracing::trace!(%room_id, %conn_id, %role, "dropping message not allowed for role");
            return Ok(());
        };

        let frame = event.to_frame()?;
        self.registry.broadcast(room_id, *conn_id, &frame).await;
        Ok(())
    }

    /// Queues a frame for this connection's own socket.
    async fn send(&self, frame: Bytes) -> Result<(), RelayError> {
        self.outbound.send(frame).await.map_err(|_| {
            RelayError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "writer closed"))
        })
    }
}

/// Writes queued frames until every sender is gone, then shuts the write
/// side down.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionId, RoomId};
    use crate::error::FrameError;
    use crate::ws::frame::{Decoded, apply_mask, decode};
    use serde_json::{Value, json};
    use tokio::io::{DuplexStream, duplex};

    fn client_frame(payload: &[u8], opcode: Opcode) -> Vec<u8> {
        let key = [0x11, 0x22, 0x33, 0x44];
        let Ok(plain) = frame::encode(payload, opcode) else {
            panic!("encode failed");
        };
        let header_len = plain.len() - payload.len();
        let mut out: Vec<u8> = plain.iter().take(header_len).copied().collect();
        if let Some(b1) = out.get_mut(1) {
            *b1 |= 0x80;
        }
        out.extend_from_slice(&key);
        let mut body = payload.to_vec();
        apply_mask(&mut body, key);
        out.extend_from_slice(&body);
        out
    }

    async fn read_frame(client: &mut DuplexStream, pending: &mut Vec<u8>) -> Frame {
        loop {
            if let Ok(Decoded::Frame { frame, consumed }) = decode(pending) {
                pending.drain(..consumed);
                return frame;
            }
            let mut chunk = [0u8; 1024];
            let Ok(n) = client.read(&mut chunk).await else {
                panic!("read failed");
            };
            assert!(n > 0, "stream closed before a frame arrived");
            pending.extend(chunk.iter().take(n));
        }
    }

    fn json_of(frame: &Frame) -> Value {
        let Ok(value) = serde_json::from_slice(&frame.payload) else {
            panic!("payload is not JSON");
        };
        value
    }

    struct Harness {
        registry: Arc<RoomRegistry>,
        room_id: RoomId,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(RoomRegistry::new()),
                room_id: RoomId::from("abc"),
            }
        }

        async fn connect(
            &self,
        ) -> (
            DuplexStream,
            tokio::task::JoinHandle<Result<CloseReason, RelayError>>,
        ) {
            let (tx, rx) = mpsc::channel(16);
            let Ok(membership) = self
                .registry
                .join(self.room_id.clone(), ConnectionId::new(), tx.clone())
                .await
            else {
                panic!("join failed");
            };
            let conn = Connection::new(
                membership,
                BytesMut::new(),
                1024,
                tx,
                Arc::clone(&self.registry),
            );
            let (client, server) = duplex(64 * 1024);
            let handle = tokio::spawn(conn.run(server, rx));
            (client, handle)
        }
    }

    #[tokio::test]
    async fn ping_gets_pong_with_same_payload() {
        let harness = Harness::new();
        let (mut client, _handle) = harness.connect().await;
        let mut pending = Vec::new();
        let _welcome = read_frame(&mut client, &mut pending).await;

        let Ok(()) = client.write_all(&client_frame(b"hb-1", Opcode::Ping)).await else {
            panic!("write failed");
        };
        let pong = read_frame(&mut client, &mut pending).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload.as_ref(), b"hb-1");
    }

    #[tokio::test]
    async fn role_gating_and_leave_cleanup() {
        let harness = Harness::new();
        let (mut host, host_handle) = harness.connect().await;
        let (mut guest, _guest_handle) = harness.connect().await;
        let mut host_pending = Vec::new();
        let mut guest_pending = Vec::new();

        assert_eq!(json_of(&read_frame(&mut host, &mut host_pending).await)["role"], "host");
        assert_eq!(
            json_of(&read_frame(&mut host, &mut host_pending).await),
            json!({"type": "peer", "status": "joined"})
        );
        assert_eq!(json_of(&read_frame(&mut guest, &mut guest_pending).await)["role"], "guest");

        // Dropped: guest may not send state, host may not send input, garbage.
        let mut batch = client_frame(br#"{"type":"state","state":{"cheat":1}}"#, Opcode::Text);
        batch.extend(client_frame(b"not json", Opcode::Text));
        batch.extend(client_frame(br#"{"type":"input","input":{"up":true}}"#, Opcode::Text));
        let Ok(()) = guest.write_all(&batch).await else {
            panic!("write failed");
        };
        let Ok(()) = host
            .write_all(&client_frame(br#"{"type":"input","input":{"x":1}}"#, Opcode::Text))
            .await
        else {
            panic!("write failed");
        };
        let Ok(()) = host
            .write_all(&client_frame(br#"{"type":"state","state":{"ballX":10}}"#, Opcode::Text))
            .await
        else {
            panic!("write failed");
        };

        assert_eq!(
            json_of(&read_frame(&mut host, &mut host_pending).await),
            json!({"type": "input", "input": {"up": true}})
        );
        assert_eq!(
            json_of(&read_frame(&mut guest, &mut guest_pending).await),
            json!({"type": "state", "state": {"ballX": 10}})
        );

        let Ok(()) = host.write_all(&client_frame(&[0x03, 0xe8], Opcode::Close)).await else {
            panic!("write failed");
        };
        let echo = read_frame(&mut host, &mut host_pending).await;
        assert_eq!(echo.opcode, Opcode::Close);
        assert_eq!(echo.payload.as_ref(), &[0x03, 0xe8]);
        let Ok(Ok(reason)) = host_handle.await else {
            panic!("host connection task failed");
        };
        assert_eq!(reason, CloseReason::CloseFrame);

        assert_eq!(
            json_of(&read_frame(&mut guest, &mut guest_pending).await),
            json!({"type": "peer", "status": "left"})
        );
        assert_eq!(harness.registry.occupancy(&harness.room_id).await, 1);
    }

    #[tokio::test]
    async fn unsupported_length_is_fatal_and_cleans_up() {
        let harness = Harness::new();
        let (mut client, handle) = harness.connect().await;

        let Ok(()) = client
            .write_all(&[0x81, 0xff, 0, 0, 0, 1, 0, 0, 0, 0, 1, 2, 3, 4])
            .await
        else {
            panic!("write failed");
        };
        let Ok(result) = handle.await else {
            panic!("connection task panicked");
        };
        assert!(matches!(
            result,
            Err(RelayError::FrameDecode(FrameError::UnsupportedLength(_)))
        ));
        assert!(harness.registry.is_empty().await);
    }

    #[tokio::test]
    async fn eof_runs_leave_cleanup() {
        let harness = Harness::new();
        let (client, handle) = harness.connect().await;
        drop(client);

        let Ok(Ok(reason)) = handle.await else {
            panic!("connection task failed");
        };
        assert_eq!(reason, CloseReason::Eof);
        assert!(!harness.registry.contains(&harness.room_id).await);
    }
}
