//! Error types for fastsync

use thiserror::Error;

/// Core error type for fastsync operations
#[derive(Error, Debug)]
pub enum FastSyncError {
    /// Network or session level failure. Eligible for reconnect-and-retry.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the statement (syntax, unknown variable, privileges...)
    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("MySQL binary logging is not enabled.")]
    BinlogDisabled,

    #[error("GTID is not enabled.")]
    GtidNotEnabled,

    #[error("GTID mode is not enabled.")]
    GtidModeNotEnabled,

    #[error("No GTID was found with \"{0}\".")]
    GtidNotFound(String),

    #[error("No suitable GTID was found.")]
    NoSuitableGtid,

    #[error("{0} table not found.")]
    TableNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FastSyncError {
    /// Whether this failure is transient at the session level.
    ///
    /// Only connectivity-class failures are worth a reconnect; a statement the
    /// server rejected will be rejected again on a fresh session.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FastSyncError::Connection(_) | FastSyncError::Io(_))
    }
}

/// Result type alias for fastsync operations
pub type Result<T> = std::result::Result<T, FastSyncError>;
