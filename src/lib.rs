//! # duet-relay
//!
//! Realtime relay pairing WebSocket clients into rooms of two.
//!
//! The first connection to a room becomes the `host`, the second the
//! `guest`. The guest's `input` messages are forwarded to the host and the
//! host's `state` messages to the guest; the relay never interprets either.
//! The WebSocket handshake and framing are implemented here over raw TCP.
//!
//! ## Architecture
//!
//! ```text
//! Clients (TCP)
//!     │
//!     ├── Accept loop (server)
//!     ├── Handshake + join (ws/handler, ws/handshake)
//!     │
//!     ├── Relay engine, one task per connection (ws/connection)
//!     ├── Frame codec (ws/frame)
//!     │
//!     └── RoomRegistry (domain/)
//! ```

pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod ws;
