//! Unbuffered result sets
//!
//! A background task owns the session lock while it walks the server-side
//! result and forwards rows over a bounded channel, so memory stays flat no
//! matter how large the table is.

use async_trait::async_trait;
use fastsync_core::{FastSyncError, Result, Row, RowStream, Value};
use mysql_async::{Conn, prelude::*};
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, mpsc};

use crate::connection::{classify_error, mysql_value_to_text};

/// Rows buffered between the reader task and the consumer
const CHANNEL_CAPACITY: usize = 1024;

enum StreamEvent {
    Columns(Vec<String>),
    Row(Vec<Value>),
}

pub(crate) struct MySqlRowStream {
    columns: Vec<String>,
    shared_columns: Arc<[String]>,
    rx: mpsc::Receiver<Result<StreamEvent>>,
    done: bool,
}

impl MySqlRowStream {
    /// Run `sql` on the locked session and wait for the column header.
    ///
    /// Statement errors surface here rather than on the first batch.
    pub(crate) async fn start(guard: OwnedMutexGuard<Option<Conn>>, sql: String) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(read_result(guard, sql, tx));

        match rx.recv().await {
            Some(Ok(StreamEvent::Columns(columns))) => Ok(Self {
                shared_columns: columns.clone().into(),
                columns,
                rx,
                done: false,
            }),
            Some(Ok(StreamEvent::Row(_))) => Err(FastSyncError::Other(
                "streamed result delivered rows before its columns".into(),
            )),
            Some(Err(e)) => Err(e),
            None => Err(FastSyncError::Connection(
                "streaming reader stopped before returning a result".into(),
            )),
        }
    }
}

async fn read_result(
    mut guard: OwnedMutexGuard<Option<Conn>>,
    sql: String,
    tx: mpsc::Sender<Result<StreamEvent>>,
) {
    let Some(conn) = guard.as_mut() else {
        let _ = tx
            .send(Err(FastSyncError::Connection("session is closed".into())))
            .await;
        return;
    };

    let mut result = match conn.query_iter(sql).await {
        Ok(result) => result,
        Err(e) => {
            let _ = tx.send(Err(classify_error(e))).await;
            return;
        }
    };

    let columns: Vec<String> = result
        .columns_ref()
        .iter()
        .map(|col| col.name_str().to_string())
        .collect();
    let width = columns.len();
    if tx.send(Ok(StreamEvent::Columns(columns))).await.is_err() {
        let _ = result.drop_result().await;
        return;
    }

    let mut sent: u64 = 0;
    loop {
        match result.next().await {
            Ok(Some(mut row)) => {
                let values = (0..width)
                    .map(|idx| {
                        mysql_value_to_text(
                            row.take::<mysql_async::Value, usize>(idx)
                                .unwrap_or(mysql_async::Value::NULL),
                        )
                    })
                    .collect();
                if tx.send(Ok(StreamEvent::Row(values))).await.is_err() {
                    tracing::debug!(rows = sent, "stream consumer went away, discarding rest of result");
                    let _ = result.drop_result().await;
                    return;
                }
                sent += 1;
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(classify_error(e))).await;
                return;
            }
        }
    }
    tracing::debug!(rows = sent, "streamed result exhausted");
}

#[async_trait]
impl RowStream for MySqlRowStream {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_batch(&mut self, max_rows: usize) -> Result<Vec<Row>> {
        let max_rows = max_rows.max(1);
        let mut batch = Vec::with_capacity(max_rows.min(CHANNEL_CAPACITY));

        while !self.done && batch.len() < max_rows {
            match self.rx.recv().await {
                Some(Ok(StreamEvent::Row(values))) => {
                    batch.push(Row::new(self.shared_columns.clone(), values));
                }
                Some(Ok(StreamEvent::Columns(_))) => {}
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => self.done = true,
            }
        }
        Ok(batch)
    }
}
