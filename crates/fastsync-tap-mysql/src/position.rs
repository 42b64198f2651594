//! Replication checkpoint resolution
//!
//! The checkpoint depends on three things: whether GTIDs were requested,
//! the server flavour, and whether the sessions point at a replica.

use fastsync_connection::{DEFAULT_RETRIES, SessionTarget};
use fastsync_core::{FastSyncError, LogPosition, QueryResult, Result, Value};
use serde::{Deserialize, Serialize};

use crate::MySqlTap;
use crate::naming::{TableName, escape_identifier};
use crate::schema::{first_text, text_field};

/// A binlog status statement and the fields holding the coordinate
struct StatusQuery {
    sql: &'static str,
    file_field: &'static str,
    pos_field: &'static str,
}

/// Legacy statement first; servers that removed it reject it as a syntax error
const PRIMARY_STATUS: &[StatusQuery] = &[
    StatusQuery {
        sql: "SHOW MASTER STATUS",
        file_field: "File",
        pos_field: "Position",
    },
    StatusQuery {
        sql: "SHOW BINARY LOG STATUS",
        file_field: "File",
        pos_field: "Position",
    },
];

const REPLICA_STATUS: &[StatusQuery] = &[
    StatusQuery {
        sql: "SHOW SLAVE STATUS",
        file_field: "Master_Log_File",
        pos_field: "Read_Master_Log_Pos",
    },
    StatusQuery {
        sql: "SHOW REPLICA STATUS",
        file_field: "Source_Log_File",
        pos_field: "Read_Source_Log_Pos",
    },
];

/// Current high-water mark of an incremental replication key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalKeyPosition {
    pub replication_key: String,
    pub replication_key_value: serde_json::Value,
    pub version: i64,
}

/// Pick the MariaDB GTID (`domain-server_id-sequence`) written by `server_id`
pub fn select_mariadb_gtid(gtids: &str, server_id: &str) -> Option<String> {
    gtids
        .split(',')
        .map(str::trim)
        .filter(|gtid| !gtid.is_empty())
        .find(|gtid| {
            let parts: Vec<&str> = gtid.split('-').collect();
            parts.len() == 3 && parts[1] == server_id
        })
        .map(str::to_string)
}

/// Pick the MySQL GTID (`server_uuid:interval`) originating from `server_uuid`
pub fn select_mysql_gtid(gtids: &str, server_uuid: &str) -> Option<String> {
    gtids
        .split(',')
        .map(str::trim)
        .filter(|gtid| !gtid.is_empty())
        .find(|gtid| {
            let parts: Vec<&str> = gtid.split(':').collect();
            parts.len() == 2 && parts[0] == server_uuid
        })
        .map(str::to_string)
}

fn parse_status(result: &QueryResult, query: &StatusQuery) -> Result<LogPosition> {
    let row = result.first().ok_or(FastSyncError::BinlogDisabled)?;

    let file = text_field(row, query.file_field).ok_or_else(|| {
        FastSyncError::Other(format!("{} returned no {}", query.sql, query.file_field))
    })?;
    let offset = row
        .get_by_name(query.pos_field)
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            FastSyncError::Other(format!("{} returned no {}", query.sql, query.pos_field))
        })?;

    let mut position = LogPosition::binlog(file, offset);
    if let (LogPosition::BinlogCoordinate { version, .. }, Some(v)) = (
        &mut position,
        row.get_by_name("version").and_then(Value::as_i64),
    ) {
        *version = v;
    }
    Ok(position)
}

/// JSON rendering of a key value: ISO-8601 for temporal values, numbers for decimals
fn key_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Int64(v) => serde_json::Value::from(*v),
        Value::UInt64(v) => serde_json::Value::from(*v),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Decimal(v) => v
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(v.clone())),
        Value::Date(d) => serde_json::Value::String(format!("{}T00:00:00", d.format("%Y-%m-%d"))),
        Value::DateTime(dt) => {
            let rendered = if dt.and_utc().timestamp_subsec_nanos() == 0 {
                dt.format("%Y-%m-%dT%H:%M:%S")
            } else {
                dt.format("%Y-%m-%dT%H:%M:%S%.6f")
            };
            serde_json::Value::String(rendered.to_string())
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

impl MySqlTap {
    /// Checkpoint a consumer resumes replication from
    #[tracing::instrument(skip(self))]
    pub async fn fetch_current_log_pos(&mut self) -> Result<LogPosition> {
        if self.config().use_gtid {
            if self.is_mariadb() {
                self.find_mariadb_gtid_pos().await
            } else {
                self.find_mysql_gtid_pos().await
            }
        } else {
            self.binlog_coordinates().await
        }
    }

    async fn binlog_coordinates(&mut self) -> Result<LogPosition> {
        let queries = if self.connections.is_replica() {
            tracing::debug!("Connecting to replica to get binlog coordinates...");
            REPLICA_STATUS
        } else {
            tracing::debug!("Connecting to primary to get binlog coordinates...");
            PRIMARY_STATUS
        };

        let mut queries = queries.iter().peekable();
        while let Some(query) = queries.next() {
            match self.connections.query(query.sql).await {
                Ok(result) => return parse_status(&result, query),
                Err(FastSyncError::Query(msg)) if queries.peek().is_some() => {
                    tracing::debug!(statement = query.sql, error = %msg, "status statement rejected, trying its replacement");
                }
                Err(e) => return Err(e),
            }
        }
        Err(FastSyncError::BinlogDisabled)
    }

    async fn find_mariadb_gtid_pos(&mut self) -> Result<LogPosition> {
        let sql = if self.connections.is_replica() {
            tracing::info!("Connecting to replica to get gtid...");
            "select @@gtid_slave_pos as current_gtids;"
        } else {
            tracing::info!("Connecting to primary to get gtid...");
            "select @@gtid_current_pos as current_gtids;"
        };

        let result = self.connections.query(sql).await?;
        let gtids = first_text(&result, "current_gtids")
            .filter(|g| !g.trim().is_empty())
            .ok_or(FastSyncError::GtidNotEnabled)?;

        let server_id = self
            .primary_server_variable("select @@server_id as server_id;", "server_id")
            .await?;
        tracing::info!(gtids = %gtids, server_id = %server_id, "Found GTID(s)");

        let gtid = select_mariadb_gtid(&gtids, &server_id).ok_or(FastSyncError::NoSuitableGtid)?;
        tracing::info!(gtid = %gtid, "Using GTID for state bookmark");
        Ok(LogPosition::gtid(gtid))
    }

    async fn find_mysql_gtid_pos(&mut self) -> Result<LogPosition> {
        let result = self.connections.query("select @@gtid_mode as gtid_mode;").await?;
        if first_text(&result, "gtid_mode").as_deref() != Some("ON") {
            return Err(FastSyncError::GtidModeNotEnabled);
        }

        let result = self
            .connections
            .query("select @@GLOBAL.gtid_executed as current_gtids;")
            .await?;
        let gtids = first_text(&result, "current_gtids")
            .ok_or_else(|| FastSyncError::GtidNotFound("@@GLOBAL.gtid_executed".into()))?;

        let server_uuid = self
            .primary_server_variable("select @@server_uuid as server_uuid;", "server_uuid")
            .await?;
        tracing::info!(gtids = %gtids, "Found GTID(s)");

        let gtid = select_mysql_gtid(&gtids, &server_uuid).ok_or(FastSyncError::NoSuitableGtid)?;
        tracing::info!(gtid = %gtid, "Using GTID for state bookmark");
        Ok(LogPosition::gtid(gtid))
    }

    /// Read a variable from the primary server.
    ///
    /// On a replica this opens a separate primary session that is closed
    /// again whatever the query outcome.
    async fn primary_server_variable(&mut self, sql: &str, field: &str) -> Result<String> {
        let result = if self.connections.is_replica() {
            let session = self.connections.open_detached(true).await?;
            let result = self
                .connections
                .query_with(
                    &SessionTarget::Detached(session.clone()),
                    sql,
                    &[],
                    DEFAULT_RETRIES,
                )
                .await;
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "failed to close primary session");
            }
            result?
        } else {
            self.connections.query(sql).await?
        };

        first_text(&result, field)
            .ok_or_else(|| FastSyncError::Other(format!("{} returned no value", field)))
    }

    /// Current maximum of `replication_key` in `table`
    #[tracing::instrument(skip(self), fields(table = %table))]
    pub async fn fetch_current_incremental_key_pos(
        &mut self,
        table: &TableName,
        replication_key: &str,
    ) -> Result<IncrementalKeyPosition> {
        let sql = format!(
            "SELECT MAX({}) AS key_value FROM {}",
            escape_identifier(replication_key),
            table.quoted()
        );
        let result = self.connections.query(&sql).await?;
        let row = result.first().ok_or_else(|| {
            FastSyncError::Other(format!(
                "Cannot get replication key value for table: {}",
                table
            ))
        })?;

        let key_value = row
            .get_by_name("key_value")
            .map(key_value_to_json)
            .unwrap_or(serde_json::Value::Null);

        Ok(IncrementalKeyPosition {
            replication_key: replication_key.to_string(),
            replication_key_value: key_value,
            version: 1,
        })
    }
}
