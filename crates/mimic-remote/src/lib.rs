//! # mimic-remote
//!
//! The control server link. Authenticates over HTTP, opens a WebSocket,
//! applies commands pushed by the server (config merges, forced runs) through
//! the manager handle, and publishes a status update on a fixed interval.
//! Reconnects with exponential backoff.

pub mod backoff;
pub mod client;
pub mod protocol;

pub use backoff::Backoff;
pub use client::{ConnectionState, RemoteControl, RemoteSession};
pub use protocol::{AuthResponse, ClientMessage, ServerMessage};
