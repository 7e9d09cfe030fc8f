//! WebSocket layer: frame codec, handshake, message parsing, relay engine.
//!
//! The protocol is implemented directly over the TCP byte stream. Only the
//! subset the relay needs is supported: unfragmented frames, text routing,
//! ping/pong, and close.

pub mod connection;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod messages;
