//! fastsync core - shared abstractions for the snapshot extraction crates
//!
//! This crate defines the pieces every other fastsync crate depends on:
//!
//! - `Session` / `SessionConnector` / `RowStream` - the database client seam
//! - `ConnectionConfig` - source connection settings with defaults applied
//! - `LogPosition` - the replication checkpoint written next to a snapshot
//! - `TypeMapper` - injected source-to-target column type mapping
//! - `Value`, `Row`, `QueryResult` and the `FastSyncError` error type

mod config;
mod error;
mod position;
mod session;
mod type_mapping;
mod types;

pub use config::*;
pub use error::*;
pub use position::*;
pub use session::*;
pub use type_mapping::*;
pub use types::*;
