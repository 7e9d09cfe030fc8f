//! duet-relay server entry point.
//!
//! Binds the configured address and relays until Ctrl-C.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use duet_relay::app_state::RelayState;
use duet_relay::config::{LogFormat, RelayConfig};
use duet_relay::server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RelayConfig::from_env()
        .map_err(|err| anyhow::anyhow!(err))
        .context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(addr = %config.listen_addr, "starting duet-relay");

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let state = RelayState::new(config);
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    serve(listener, state, shutdown).await?;
    Ok(())
}
