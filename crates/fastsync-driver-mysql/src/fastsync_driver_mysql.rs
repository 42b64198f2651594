//! MySQL/MariaDB driver for fastsync
//!
//! Implements the `Session` seam from `fastsync-core` on top of `mysql_async`.
//! Buffered queries convert values by column type; streamed queries hand back
//! the server's text rendering untouched.

mod connection;
mod driver;
mod stream;

pub use connection::MySqlSession;
pub use driver::MySqlConnector;
