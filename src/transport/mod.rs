//! Transport module - the WebSocket connection to the backend.
//!
//! Provides:
//! - [`Endpoint`] - validated `ws://` / `wss://` address, loopback by default
//! - [`connect`] - one bounded connection attempt

mod socket;

pub use socket::{connect, Endpoint, WsStream, DEFAULT_HOST, DEFAULT_PORT};
