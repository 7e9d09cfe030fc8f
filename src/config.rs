//! Relay configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Unset or unparsable tuning values fall back to defaults;
//! only the listen address is validated strictly.

use std::net::SocketAddr;

/// Default bind address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the listener to.
    pub listen_addr: SocketAddr,

    /// Largest accepted HTTP request head, in bytes.
    pub max_handshake_bytes: usize,

    /// Largest accepted frame payload, in bytes.
    pub max_frame_bytes: usize,

    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_handshake_bytes: 8192,
            max_frame_bytes: 16 * 1024 * 1024,
            outbound_queue_capacity: 256,
            log_format: LogFormat::Pretty,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// `LISTEN_ADDR` wins over `PORT`; with neither set the relay binds
    /// [`DEFAULT_LISTEN_ADDR`].
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` or `PORT` is set but cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = match (std::env::var("LISTEN_ADDR"), std::env::var("PORT")) {
            (Ok(addr), _) => addr.parse()?,
            (Err(_), Ok(port)) => SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?)),
            (Err(_), Err(_)) => DEFAULT_LISTEN_ADDR.parse()?,
        };

        let defaults = Self::default();
        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            max_handshake_bytes: parse_env("MAX_HANDSHAKE_BYTES", defaults.max_handshake_bytes),
            max_frame_bytes: parse_env("MAX_FRAME_BYTES", defaults.max_frame_bytes),
            outbound_queue_capacity: parse_env(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            )
            .max(1),
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
