//! MySQL session implementation

use async_trait::async_trait;
use fastsync_core::{
    FastSyncError, QueryResult, Result, Row, RowStream, Session, SessionMode, Value,
};
use mysql_async::{Conn, Row as MySqlRow, consts::ColumnType, prelude::*};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::stream::MySqlRowStream;

/// Server error codes that mean the session itself is unusable
const CONNECTIVITY_SERVER_CODES: &[u16] = &[
    1040, // too many connections
    1053, // server shutdown in progress
    1152, // aborted connection
    1159, // net read timeout
    1161, // net write timeout
    1205, // lock wait timeout
    1213, // deadlock
    1927, // connection killed
];

/// One physical session to a MySQL-compatible server.
///
/// The connection sits behind an async mutex, so a streamed result set holds
/// the session until it is drained.
pub struct MySqlSession {
    conn: Arc<Mutex<Option<Conn>>>,
    mode: SessionMode,
}

impl MySqlSession {
    pub(crate) fn new(conn: Conn, mode: SessionMode) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            mode,
        }
    }
}

/// Map a mysql_async error onto the retry classification fastsync uses
pub(crate) fn classify_error(err: mysql_async::Error) -> FastSyncError {
    match err {
        mysql_async::Error::Io(e) => FastSyncError::Connection(e.to_string()),
        mysql_async::Error::Driver(e) => FastSyncError::Connection(e.to_string()),
        mysql_async::Error::Server(e) if CONNECTIVITY_SERVER_CODES.contains(&e.code) => {
            FastSyncError::Connection(format!("{} ({})", e.message, e.code))
        }
        mysql_async::Error::Server(e) => FastSyncError::Query(format!("{} ({})", e.message, e.code)),
        mysql_async::Error::Url(e) => FastSyncError::Configuration(e.to_string()),
        other => FastSyncError::Other(other.to_string()),
    }
}

/// Escape a value for SQL literal inclusion
pub(crate) fn value_to_mysql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::Float64(v) => v.to_string(),
        Value::Decimal(v) => v.clone(),
        Value::String(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "''")),
        Value::Bytes(v) => {
            let hex: String = v.iter().map(|b| format!("{:02x}", b)).collect();
            format!("X'{}'", hex)
        }
        Value::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        Value::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f")),
    }
}

/// Substitute `?` placeholders, left to right, with literal values.
///
/// Placeholders inside quoted strings or backticked identifiers are left alone.
/// A backslash inside a quoted string escapes the character after it.
pub(crate) fn bind_params(sql: &str, params: &[Value]) -> Result<String> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut bound = String::with_capacity(sql.len() + params.len() * 8);
    let mut remaining = params.iter();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in sql.chars() {
        match quote {
            Some(_) if escaped => {
                escaped = false;
                bound.push(ch);
            }
            Some(q) => {
                if ch == '\\' && q != '`' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                bound.push(ch);
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    bound.push(ch);
                }
                '?' => {
                    let value = remaining.next().ok_or_else(|| {
                        FastSyncError::Query(format!(
                            "statement has more placeholders than the {} bound parameters",
                            params.len()
                        ))
                    })?;
                    bound.push_str(&value_to_mysql_literal(value));
                }
                _ => bound.push(ch),
            },
        }
    }

    if remaining.next().is_some() {
        return Err(FastSyncError::Query(format!(
            "{} parameters bound but the statement has fewer placeholders",
            params.len()
        )));
    }
    Ok(bound)
}

/// Convert a mysql_async value to a typed value, using column type metadata
/// to interpret byte strings from the text protocol.
pub(crate) fn mysql_value_to_value(val: mysql_async::Value, col_type: ColumnType) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => match col_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_YEAR => match s.parse::<i64>() {
                    Ok(v) => Value::Int64(v),
                    Err(_) => s
                        .parse::<u64>()
                        .map(Value::UInt64)
                        .unwrap_or(Value::String(s)),
                },
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                    s.parse::<f64>().map(Value::Float64).unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Decimal(s)
                }
                ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
                    chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                        .map(Value::Date)
                        .unwrap_or(Value::String(s))
                }
                ColumnType::MYSQL_TYPE_DATETIME
                | ColumnType::MYSQL_TYPE_DATETIME2
                | ColumnType::MYSQL_TYPE_TIMESTAMP
                | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
                    chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(Value::DateTime)
                        .unwrap_or(Value::String(s))
                }
                _ => Value::String(s),
            },
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(i) => Value::Int64(i),
        mysql_async::Value::UInt(u) => match i64::try_from(u) {
            Ok(v) => Value::Int64(v),
            Err(_) => Value::UInt64(u),
        },
        mysql_async::Value::Float(f) => Value::Float64(f as f64),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
            let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
            if hour == 0 && min == 0 && sec == 0 && micro == 0 {
                match date {
                    Some(date) => Value::Date(date),
                    None => Value::String(format!("{:04}-{:02}-{:02}", year, month, day)),
                }
            } else {
                match date.and_then(|d| d.and_hms_micro_opt(hour as u32, min as u32, sec as u32, micro))
                {
                    Some(dt) => Value::DateTime(dt),
                    None => Value::String(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, min, sec
                    )),
                }
            }
        }
        mysql_async::Value::Time(negative, days, hours, mins, secs, micros) => {
            Value::String(format_time(negative, days, hours, mins, secs, micros))
        }
    }
}

/// Convert a mysql_async value to its text rendering.
///
/// Exported rows keep whatever the server sent, so a DECIMAL(38,18) never
/// passes through a float.
pub(crate) fn mysql_value_to_text(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        other => match mysql_value_to_value(other, ColumnType::MYSQL_TYPE_STRING) {
            Value::Null => Value::Null,
            typed => Value::String(typed.to_string()),
        },
    }
}

fn format_time(negative: bool, days: u32, hours: u8, mins: u8, secs: u8, micros: u32) -> String {
    let total_hours = days * 24 + hours as u32;
    let sign = if negative { "-" } else { "" };
    if micros == 0 {
        format!("{}{:02}:{:02}:{:02}", sign, total_hours, mins, secs)
    } else {
        format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            sign, total_hours, mins, secs, micros
        )
    }
}

fn convert_rows(mysql_rows: Vec<MySqlRow>) -> (Vec<String>, Vec<Row>) {
    let Some(first) = mysql_rows.first() else {
        return (Vec::new(), Vec::new());
    };

    let column_names: Vec<String> = first
        .columns_ref()
        .iter()
        .map(|col| col.name_str().to_string())
        .collect();
    let column_types: Vec<ColumnType> = first
        .columns_ref()
        .iter()
        .map(|col| col.column_type())
        .collect();
    let shared: Arc<[String]> = column_names.clone().into();

    let rows = mysql_rows
        .into_iter()
        .map(|mut mysql_row| {
            let values = column_types
                .iter()
                .enumerate()
                .map(|(idx, col_type)| {
                    let val = mysql_row
                        .take::<mysql_async::Value, usize>(idx)
                        .unwrap_or(mysql_async::Value::NULL);
                    mysql_value_to_value(val, *col_type)
                })
                .collect();
            Row::new(shared.clone(), values)
        })
        .collect();

    (column_names, rows)
}

#[async_trait]
impl Session for MySqlSession {
    #[tracing::instrument(skip(self, sql, params), fields(mode = %self.mode, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let final_sql = bind_params(sql, params)?;

        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| FastSyncError::Connection("session is closed".into()))?;

        let mysql_rows: Vec<MySqlRow> = conn.query(final_sql).await.map_err(classify_error)?;
        let affected_rows = conn.affected_rows();
        drop(guard);

        let (columns, rows) = convert_rows(mysql_rows);
        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = rows.len(),
            execution_time_ms = execution_time_ms,
            "query executed"
        );

        Ok(QueryResult {
            columns,
            rows,
            affected_rows,
            execution_time_ms,
        })
    }

    #[tracing::instrument(skip(self, sql), fields(mode = %self.mode, sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query_stream(&self, sql: &str) -> Result<Box<dyn RowStream>> {
        let guard = self.conn.clone().lock_owned().await;
        let stream = MySqlRowStream::start(guard, sql.to_string()).await?;
        Ok(Box::new(stream))
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            tracing::debug!(mode = %self.mode, "closing MySQL session");
            conn.disconnect().await.map_err(classify_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn text(s: &str) -> mysql_async::Value {
        mysql_async::Value::Bytes(s.as_bytes().to_vec())
    }

    #[rstest]
    #[case(ColumnType::MYSQL_TYPE_LONG, "42", Value::Int64(42))]
    #[case(
        ColumnType::MYSQL_TYPE_LONGLONG,
        "18446744073709551615",
        Value::UInt64(u64::MAX)
    )]
    #[case(ColumnType::MYSQL_TYPE_NEWDECIMAL, "12.50", Value::Decimal("12.50".into()))]
    #[case(ColumnType::MYSQL_TYPE_DOUBLE, "0.5", Value::Float64(0.5))]
    #[case(ColumnType::MYSQL_TYPE_VAR_STRING, "binlog.000002", Value::String("binlog.000002".into()))]
    #[case(ColumnType::MYSQL_TYPE_DATETIME, "0000-00-00 00:00:00", Value::String("0000-00-00 00:00:00".into()))]
    fn test_text_protocol_conversion(
        #[case] col_type: ColumnType,
        #[case] raw: &str,
        #[case] expected: Value,
    ) {
        assert_eq!(mysql_value_to_value(text(raw), col_type), expected);
    }

    #[test]
    fn test_datetime_parses_when_valid() {
        let value = mysql_value_to_value(
            text("2024-01-01 12:30:00"),
            ColumnType::MYSQL_TYPE_TIMESTAMP,
        );
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();
        assert_eq!(value, Value::DateTime(expected));
    }

    #[test]
    fn test_export_text_is_verbatim() {
        assert_eq!(
            mysql_value_to_text(text("123456789012345678.123456789012345678")),
            Value::String("123456789012345678.123456789012345678".into())
        );
        assert_eq!(mysql_value_to_text(mysql_async::Value::NULL), Value::Null);
        assert_eq!(
            mysql_value_to_text(mysql_async::Value::Int(-7)),
            Value::String("-7".into())
        );
        assert_eq!(
            mysql_value_to_text(mysql_async::Value::Bytes(vec![0xff, 0x00])),
            Value::Bytes(vec![0xff, 0x00])
        );
    }

    #[test]
    fn test_bind_params_substitutes_in_order() {
        let sql = bind_params(
            "SELECT * FROM t WHERE a = ? AND b = ? AND c = '?'",
            &[Value::String("it's".into()), Value::Int64(3)],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 'it''s' AND b = 3 AND c = '?'");
    }

    #[test]
    fn test_bind_params_skips_escaped_quotes() {
        let sql = bind_params(r"SELECT 'it\'s ?', ?", &[Value::Int64(1)]).unwrap();
        assert_eq!(sql, r"SELECT 'it\'s ?', 1");

        let sql = bind_params(r#"SELECT "a\\", ?"#, &[Value::Int64(2)]).unwrap();
        assert_eq!(sql, r#"SELECT "a\\", 2"#);
    }

    #[test]
    fn test_bind_params_count_mismatch() {
        assert!(bind_params("SELECT ?", &[]).is_ok());
        assert!(bind_params("SELECT ?, ?", &[Value::Null]).is_err());
        assert!(bind_params("SELECT ?", &[Value::Null, Value::Null]).is_err());
    }

    #[test]
    fn test_server_errors_classified_by_code() {
        let server = |code: u16| {
            mysql_async::Error::Server(mysql_async::ServerError {
                code,
                message: "boom".into(),
                state: "HY000".into(),
            })
        };
        assert!(classify_error(server(1213)).is_connectivity());
        assert!(!classify_error(server(1146)).is_connectivity());
        let io = mysql_async::Error::Io(mysql_async::IoError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(classify_error(io).is_connectivity());
    }
}
