//! fastsync connection management
//!
//! Owns the buffered and streaming sessions to the source server, runs the
//! session setup statements and replays a statement once after reconnecting
//! when the server connection drops.

mod manager;

pub use manager::{ConnectionHandle, ConnectionManager, DEFAULT_RETRIES, SessionTarget};
