//! Per-stream entry point: handshake, join, then hand off to the relay
//! engine.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::connection::{CloseReason, Connection};
use super::handshake::{
    TOO_MANY_REQUESTS, UpgradeRequest, liveness_response, read_request_head, switching_protocols,
};
use crate::app_state::RelayState;
use crate::domain::ConnectionId;
use crate::error::RelayError;

/// What happened to an accepted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Plain HTTP request answered with the liveness response.
    Liveness,
    /// Upgraded connection that ran until it closed.
    Relayed(CloseReason),
}

/// Services one accepted TCP stream from first byte to close.
///
/// # Errors
///
/// Returns the error that terminated the stream. A missing key drops the
/// stream without a response; a full room is answered with `429` first.
pub async fn handle_stream(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<StreamOutcome, RelayError> {
    let (head, leftover) = read_request_head(&mut stream, state.config.max_handshake_bytes).await?;

    if !head.is_upgrade() {
        stream.write_all(liveness_response().as_bytes()).await?;
        stream.shutdown().await?;
        return Ok(StreamOutcome::Liveness);
    }

    let upgrade = UpgradeRequest::from_head(&head)?;
    if upgrade.generated {
        tracing::debug!(%peer_addr, room_id = %upgrade.room_id, "generated room id");
    }

    let conn_id = ConnectionId::new();
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let membership = match state
        .registry
        .join(upgrade.room_id, conn_id, tx.clone())
        .await
    {
        Ok(membership) => membership,
        Err(err) => {
            if err.http_status() == Some(429) {
                tracing::debug!(%peer_addr, error = %err, "rejecting upgrade");
                stream.write_all(TOO_MANY_REQUESTS).await?;
                stream.shutdown().await?;
            }
            return Err(err);
        }
    };

    let mut connection = Connection::new(
        membership,
        leftover,
        state.config.max_frame_bytes,
        tx,
        Arc::clone(&state.registry),
    );

    if let Err(err) = stream
        .write_all(switching_protocols(&upgrade.key).as_bytes())
        .await
    {
        connection.close().await;
        return Err(err.into());
    }

    tracing::debug!(%peer_addr, %conn_id, role = %connection.membership().role, "upgrade complete");
    let reason = connection.run(stream, rx).await?;
    Ok(StreamOutcome::Relayed(reason))
}
