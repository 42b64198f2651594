//! Session traits: the seam between fastsync and the database client

use crate::{ConnectionParams, QueryResult, Result, Row, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// How a session delivers result sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Whole result set is fetched before returning. Used for metadata.
    Buffered,
    /// Rows are pulled from the server as they are consumed. Used for bulk export.
    Streaming,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Buffered => write!(f, "buffered"),
            SessionMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// A live database session
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a statement and buffer all returned rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement and return a cursor over its rows.
    ///
    /// The session is busy until the returned stream is exhausted or dropped.
    async fn query_stream(&self, sql: &str) -> Result<Box<dyn RowStream>>;

    /// Close the session
    async fn close(&self) -> Result<()>;
}

/// Cursor over a streamed result set
#[async_trait]
pub trait RowStream: Send {
    /// Column names of the result set
    fn columns(&self) -> &[String];

    /// Fetch up to `max_rows` rows. An empty batch means the result set is exhausted.
    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<Row>>;
}

/// Opens sessions against a resolved endpoint
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams, mode: SessionMode)
        -> Result<Arc<dyn Session>>;
}

#[async_trait]
impl<T: SessionConnector + ?Sized> SessionConnector for Arc<T> {
    async fn connect(
        &self,
        params: &ConnectionParams,
        mode: SessionMode,
    ) -> Result<Arc<dyn Session>> {
        (**self).connect(params, mode).await
    }
}

/// Row stream over rows that are already in memory
pub struct VecRowStream {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
        }
    }
}

impl From<QueryResult> for VecRowStream {
    fn from(result: QueryResult) -> Self {
        Self::new(result.columns, result.rows)
    }
}

#[async_trait]
impl RowStream for VecRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        Ok(self.rows.by_ref().take(max_rows.max(1)).collect())
    }
}
