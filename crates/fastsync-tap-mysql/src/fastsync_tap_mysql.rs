//! MySQL/MariaDB fast-sync tap
//!
//! Takes a full snapshot of a source table into compressed, optionally split
//! CSV files and resolves the replication checkpoint (binlog coordinate or
//! GTID) a change-data-capture consumer resumes from.
//!
//! All database access goes through a [`ConnectionManager`], so every
//! statement here gets the same reconnect-and-replay behavior.

mod export;
mod naming;
mod position;
mod sanitize;
mod schema;
mod sink;

#[cfg(test)]
mod testing;

use fastsync_connection::ConnectionManager;
use fastsync_core::{ConnectionConfig, Result, SessionConnector, TypeMapper};
use std::sync::Arc;

pub use export::{ExportJob, ExportSummary, SplitOptions, list_parts};
pub use naming::{
    DEFAULT_TARGET_QUOTE, TableName, escape_identifier, export_filename, safe_column_name,
};
pub use position::{IncrementalKeyPosition, select_mariadb_gtid, select_mysql_gtid};
pub use sanitize::{DateRenderType, NumericBound, SanitizeOptions, safe_sql_value};
pub use schema::{ColumnSpec, MappedColumns};
pub use sink::{ChunkedSink, SinkOptions};

/// Fast-sync source for one MySQL or MariaDB server
pub struct MySqlTap {
    connections: ConnectionManager,
    type_mapper: Arc<dyn TypeMapper>,
    target_quote: Option<char>,
}

impl MySqlTap {
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn SessionConnector>,
        type_mapper: Arc<dyn TypeMapper>,
    ) -> Self {
        Self {
            connections: ConnectionManager::new(config, connector),
            type_mapper,
            target_quote: None,
        }
    }

    /// Quote character for target column names, `"` when unset
    pub fn with_target_quote(mut self, quote: char) -> Self {
        self.target_quote = Some(quote);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.connections.config()
    }

    pub fn is_mariadb(&self) -> bool {
        self.config().is_mariadb()
    }

    pub fn connections(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    /// Open the buffered and streaming sessions
    pub async fn open(&mut self) -> Result<()> {
        self.connections.open().await
    }

    /// Close both sessions, logging failures unless `silent`
    pub async fn close(&mut self, silent: bool) {
        self.connections.close(silent).await
    }
}
