//! Scripted in-memory server for tap tests

use async_trait::async_trait;
use fastsync_core::{
    ConnectionConfig, ConnectionParams, FastSyncError, QueryResult, Result, Row, RowStream,
    Session, SessionConnector, SessionMode, Value, VecRowStream,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::MySqlTap;

pub(crate) fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("fastsync=debug"))
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

enum Response {
    Rows(Vec<Row>),
    QueryError(String),
    ConnectionError(String),
}

struct Scripted {
    needle: String,
    host: Option<String>,
    remaining: Option<u32>,
    response: Response,
}

#[derive(Clone)]
pub(crate) struct Executed {
    pub host: String,
    pub mode: SessionMode,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Answers statements by substring match; the most recently scripted match wins.
/// Unscripted statements succeed with no rows.
#[derive(Default)]
pub(crate) struct ScriptedServer {
    script: Mutex<Vec<Scripted>>,
    log: Mutex<Vec<Executed>>,
    connects: AtomicU32,
    closes: AtomicU32,
}

impl ScriptedServer {
    pub fn new() -> Arc<Self> {
        initialize_logging();
        Arc::new(Self::default())
    }

    fn push(&self, needle: &str, host: Option<&str>, remaining: Option<u32>, response: Response) {
        self.script.lock().push(Scripted {
            needle: needle.to_string(),
            host: host.map(str::to_string),
            remaining,
            response,
        });
    }

    pub fn on(&self, needle: &str, rows: Vec<Row>) {
        self.push(needle, None, None, Response::Rows(rows));
    }

    pub fn on_host(&self, host: &str, needle: &str, rows: Vec<Row>) {
        self.push(needle, Some(host), None, Response::Rows(rows));
    }

    pub fn reject(&self, needle: &str, message: &str) {
        self.push(needle, None, None, Response::QueryError(message.to_string()));
    }

    pub fn drop_connection_once(&self, needle: &str) {
        self.push(
            needle,
            None,
            Some(1),
            Response::ConnectionError("Lost connection to MySQL server during query".into()),
        );
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.log.lock().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    pub fn params_for(&self, needle: &str) -> Vec<Value> {
        self.executed()
            .into_iter()
            .find(|e| e.sql.contains(needle))
            .map(|e| e.params)
            .unwrap_or_default()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    fn respond(&self, host: &str, mode: SessionMode, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.log.lock().push(Executed {
            host: host.to_string(),
            mode,
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let mut script = self.script.lock();
        let Some(entry) = script.iter_mut().rev().find(|s| {
            sql.contains(&s.needle)
                && s.host.as_deref().is_none_or(|h| h == host)
                && s.remaining != Some(0)
        }) else {
            return Ok(QueryResult::empty());
        };

        if let Some(remaining) = entry.remaining.as_mut() {
            *remaining -= 1;
        }
        match &entry.response {
            Response::Rows(rows) => Ok(QueryResult::from_rows(rows.clone())),
            Response::QueryError(msg) => Err(FastSyncError::Query(msg.clone())),
            Response::ConnectionError(msg) => Err(FastSyncError::Connection(msg.clone())),
        }
    }
}

struct ScriptedSession {
    host: String,
    mode: SessionMode,
    server: Arc<ScriptedServer>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.server.respond(&self.host, self.mode, sql, params)
    }

    async fn query_stream(&self, sql: &str) -> Result<Box<dyn RowStream>> {
        let result = self.server.respond(&self.host, self.mode, sql, &[])?;
        Ok(Box::new(VecRowStream::from(result)))
    }

    async fn close(&self) -> Result<()> {
        self.server.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedConnector {
    server: Arc<ScriptedServer>,
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        mode: SessionMode,
    ) -> Result<Arc<dyn Session>> {
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            host: params.host.clone(),
            mode,
            server: self.server.clone(),
        }))
    }
}

/// A tap wired to `server`, with a type mapper that upper-cases the data type
pub(crate) fn tap(config: ConnectionConfig, server: &Arc<ScriptedServer>) -> MySqlTap {
    let mapper = |data_type: &str, column_type: &str| {
        if column_type == "tinyint(1)" {
            "BOOLEAN".to_string()
        } else {
            data_type.to_uppercase()
        }
    };
    MySqlTap::new(
        config.with_session_sqls(Vec::<String>::new()),
        Arc::new(ScriptedConnector {
            server: server.clone(),
        }),
        Arc::new(mapper),
    )
}

pub(crate) fn catalog_row(name: &str, data_type: &str, column_type: &str) -> Row {
    Row::from_pairs([
        ("column_name", Value::String(name.into())),
        ("data_type", Value::String(data_type.into())),
        ("column_type", Value::String(column_type.into())),
    ])
}

pub(crate) fn single(column: &str, value: Value) -> Vec<Row> {
    vec![Row::from_pairs([(column, value)])]
}
