//! Table identifiers, identifier quoting and export file names

use fastsync_core::{FastSyncError, Result};
use std::str::FromStr;

/// Quote character used for target column names when none is configured
pub const DEFAULT_TARGET_QUOTE: char = '"';

/// A fully qualified source table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub catalog: Option<String>,
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse `schema.table` or `catalog.schema.table`
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(FastSyncError::Configuration(format!(
                "invalid table name {:?}",
                name
            )));
        }
        match parts.as_slice() {
            [schema, table] => Ok(Self::new(*schema, *table)),
            [catalog, schema, table] => Ok(Self {
                catalog: Some(catalog.to_string()),
                schema: schema.to_string(),
                table: table.to_string(),
            }),
            _ => Err(FastSyncError::Configuration(format!(
                "table name {:?} is not fully qualified, expected schema.table",
                name
            ))),
        }
    }

    /// `` `schema`.`table` `` for use in generated SQL
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            escape_identifier(&self.schema),
            escape_identifier(&self.table)
        )
    }
}

impl FromStr for TableName {
    type Err = FastSyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Escape a MySQL identifier (column name, schema, etc.)
pub fn escape_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Column name as the target expects it: upper-cased and quoted
pub fn safe_column_name(name: &str, quote: Option<char>) -> String {
    let quote = quote.unwrap_or(DEFAULT_TARGET_QUOTE);
    format!("{}{}{}", quote, name.to_uppercase(), quote)
}

/// Unique file name for one export,
/// `pipelinewise_<tap>_<table>_<timestamp>_<sync_type>_<random>.csv.gz`
pub fn export_filename(tap_id: &str, table: &str, sync_type: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S-%6f");
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "pipelinewise_{}_{}_{}_{}_{}.csv.gz",
        tap_id,
        table,
        timestamp,
        sync_type,
        &random[..8]
    )
}
