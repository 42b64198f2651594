//! Catalog introspection

use fastsync_core::{FastSyncError, QueryResult, Result, Row, Value};
use serde::Serialize;

use crate::MySqlTap;
use crate::naming::{TableName, safe_column_name};
use crate::sanitize::{SanitizeOptions, safe_sql_value};

const COLUMNS_SQL: &str = "SELECT column_name AS column_name, \
     data_type AS data_type, \
     column_type AS column_type \
     FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? \
     ORDER BY ordinal_position";

/// One source column and the expression that exports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub column_name: String,
    pub data_type: String,
    pub column_type: String,
    pub safe_sql_value: String,
}

/// Target-side column definitions for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedColumns {
    /// `"<SAFE NAME> <target type>"`, in ordinal order
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
}

/// Text of a named field, `None` when absent or NULL
pub(crate) fn text_field(row: &Row, name: &str) -> Option<String> {
    row.get_by_name(name).and_then(Value::to_text)
}

pub(crate) fn first_text(result: &QueryResult, name: &str) -> Option<String> {
    result.first().and_then(|row| text_field(row, name))
}

fn required_text(row: &Row, name: &str) -> Result<String> {
    text_field(row, name)
        .ok_or_else(|| FastSyncError::Other(format!("catalog row is missing {}", name)))
}

impl MySqlTap {
    /// Columns of `table` in ordinal order, each with its export expression.
    ///
    /// An unknown table yields an empty list.
    #[tracing::instrument(skip(self, options), fields(table = %table))]
    pub async fn get_columns(
        &mut self,
        table: &TableName,
        options: &SanitizeOptions,
    ) -> Result<Vec<ColumnSpec>> {
        let result = self
            .connections
            .query_params(
                COLUMNS_SQL,
                &[
                    Value::String(table.schema.clone()),
                    Value::String(table.table.clone()),
                ],
            )
            .await?;

        result
            .rows
            .iter()
            .map(|row| {
                let column_name = required_text(row, "column_name")?;
                let data_type = required_text(row, "data_type")?;
                let column_type = required_text(row, "column_type")?;
                let safe_sql_value =
                    safe_sql_value(&column_name, &data_type, &column_type, options);
                Ok(ColumnSpec {
                    column_name,
                    data_type,
                    column_type,
                    safe_sql_value,
                })
            })
            .collect()
    }

    /// Primary key columns in key order, as target-safe names.
    ///
    /// Empty when the table has no primary key.
    #[tracing::instrument(skip(self), fields(table = %table))]
    pub async fn get_primary_keys(&mut self, table: &TableName) -> Result<Vec<String>> {
        let sql = format!(
            "SHOW KEYS FROM {} WHERE Key_name = 'PRIMARY'",
            table.quoted()
        );
        let result = self.connections.query(&sql).await?;

        let quote = self.target_quote;
        result
            .rows
            .iter()
            .map(|row| {
                required_text(row, "Column_name").map(|name| safe_column_name(&name, quote))
            })
            .collect()
    }

    /// Target column definitions built with the injected type mapper
    pub async fn map_columns_to_target_types(
        &mut self,
        table: &TableName,
    ) -> Result<MappedColumns> {
        let columns = self.get_columns(table, &SanitizeOptions::default()).await?;
        let quote = self.target_quote;
        let columns = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    safe_column_name(&c.column_name, quote),
                    self.type_mapper.target_type(&c.data_type, &c.column_type)
                )
            })
            .collect();

        Ok(MappedColumns {
            columns,
            primary_key: self.get_primary_keys(table).await?,
        })
    }
}
