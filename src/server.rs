//! TCP accept loop.
//!
//! One tokio task per accepted stream. Accept errors are logged and the
//! loop keeps going; only the shutdown future ends it.

use std::future::Future;

use tokio::net::TcpListener;

use crate::app_state::RelayState;
use crate::error::RelayError;
use crate::ws::handler::handle_stream;

/// Accepts connections on `listener` until `shutdown` resolves.
///
/// Connection tasks already running are not awaited.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] if the listener's local address cannot
/// be read.
pub async fn serve<F>(
    listener: TcpListener,
    state: RelayState,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "relay listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!(addr = %local_addr, "relay shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::debug!(%peer_addr, error = %err, "failed to set TCP_NODELAY");
                }
                let state = state.clone();
                tokio::spawn(async move {
                    match handle_stream(stream, peer_addr, state).await {
                        Ok(outcome) => tracing::debug!(%peer_addr, ?outcome, "stream finished"),
                        Err(err) => tracing::debug!(%peer_addr, error = %err, "stream terminated"),
                    }
                });
            }
        }
    }
}
