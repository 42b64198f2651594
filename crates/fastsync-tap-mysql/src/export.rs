//! Bulk table export to delimited text

use fastsync_core::{FastSyncError, Result, RowStream, Value};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::MySqlTap;
use crate::naming::{TableName, export_filename};
use crate::sanitize::SanitizeOptions;
use crate::sink::{ChunkedSink, SinkOptions};

const EXTRACTED_AT: &str = "CONVERT_TZ( NOW(),@@session.time_zone,'+00:00') AS `_SDC_EXTRACTED_AT`";
const BATCHED_AT: &str = "CONVERT_TZ( NOW(),@@session.time_zone,'+00:00') AS `_SDC_BATCHED_AT`";
const DELETED_AT: &str = "null AS `_SDC_DELETED_AT`";

const RECORD_TERMINATOR: &[u8] = b"\r\n";

/// How export output is split and compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    pub split_large_files: bool,
    pub split_file_chunk_size_mb: u64,
    pub split_file_max_chunks: usize,
    pub compress: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            split_large_files: false,
            split_file_chunk_size_mb: 1000,
            split_file_max_chunks: 20,
            compress: true,
        }
    }
}

impl SplitOptions {
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            chunk_size_mb: self.split_file_chunk_size_mb,
            max_chunks: if self.split_large_files {
                self.split_file_max_chunks
            } else {
                0
            },
            compress: self.compress,
        }
    }
}

/// One table export
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub table: TableName,
    pub path: PathBuf,
    pub sanitize: SanitizeOptions,
    pub split: SplitOptions,
    /// Appended verbatim after the table name, e.g. `WHERE id > 100`
    pub where_clause: Option<String>,
}

impl ExportJob {
    pub fn new(table: TableName, path: impl Into<PathBuf>) -> Self {
        Self {
            table,
            path: path.into(),
            sanitize: SanitizeOptions::default(),
            split: SplitOptions::default(),
            where_clause: None,
        }
    }

    pub fn with_sanitize(mut self, sanitize: SanitizeOptions) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn with_split(mut self, split: SplitOptions) -> Self {
        self.split = split;
        self
    }

    pub fn with_where_clause(mut self, where_clause: impl Into<String>) -> Self {
        let where_clause = where_clause.into();
        self.where_clause = (!where_clause.trim().is_empty()).then_some(where_clause);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub parts: Vec<PathBuf>,
    pub rows: u64,
}

fn needs_quoting(field: &str) -> bool {
    field
        .bytes()
        .any(|b| matches!(b, b',' | b'"' | b'\r' | b'\n'))
}

fn write_field(out: &mut Vec<u8>, value: &Value) {
    let Some(text) = value.to_text() else {
        return;
    };
    if needs_quoting(&text) {
        out.push(b'"');
        out.extend_from_slice(text.replace('"', "\"\"").as_bytes());
        out.push(b'"');
    } else {
        out.extend_from_slice(text.as_bytes());
    }
}

fn write_record(out: &mut Vec<u8>, values: &[Value]) {
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(b',');
        }
        write_field(out, value);
    }
    out.extend_from_slice(RECORD_TERMINATOR);
}

/// Drain `stream` into `sink` in batches of `batch_rows`.
///
/// Records reach the sink one at a time so a part rolls over at the first
/// record boundary past the chunk size, not at the end of a batch.
async fn copy_rows(
    stream: &mut dyn RowStream,
    sink: &mut ChunkedSink,
    batch_rows: usize,
    table: &TableName,
) -> Result<u64> {
    let batch_rows = batch_rows.max(1);
    let mut exported: u64 = 0;
    let mut buffer = Vec::new();

    loop {
        let rows = stream.next_batch(batch_rows).await?;
        if rows.is_empty() {
            break;
        }

        exported += rows.len() as u64;
        if rows.len() == batch_rows {
            tracing::info!(
                "Exporting batch from {} to {} rows from {}...",
                exported - batch_rows as u64,
                exported,
                table
            );
        }

        for row in &rows {
            buffer.clear();
            write_record(&mut buffer, &row.values);
            sink.write_chunk(&buffer)?;
        }
    }

    tracing::info!("Exported total of {} rows from {}...", exported, table);
    Ok(exported)
}

/// Every file whose name starts with the file name of `path`, sorted
pub fn list_parts(path: &Path) -> Result<Vec<PathBuf>> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FastSyncError::Other(format!("invalid export path {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let matcher = Glob::new(&format!("{}*", globset::escape(file_name)))
        .map_err(|e| FastSyncError::Other(e.to_string()))?
        .compile_matcher();

    let mut parts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if matcher.is_match(entry.file_name()) {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

impl MySqlTap {
    /// Stream a table snapshot into CSV part files.
    ///
    /// The sink is closed on every exit path once it has been created.
    #[tracing::instrument(skip(self, job), fields(table = %job.table))]
    pub async fn export_table(&mut self, job: ExportJob) -> Result<ExportSummary> {
        let columns = self.get_columns(&job.table, &job.sanitize).await?;
        if columns.is_empty() {
            return Err(FastSyncError::TableNotFound(job.table.to_string()));
        }

        let projection: Vec<&str> = columns
            .iter()
            .map(|c| c.safe_sql_value.as_str())
            .chain([EXTRACTED_AT, BATCHED_AT, DELETED_AT])
            .collect();
        let sql = format!(
            "SELECT {} FROM {} {}",
            projection.join(","),
            job.table.quoted(),
            job.where_clause.as_deref().unwrap_or_default()
        );
        let sql = sql.trim_end();

        let mut stream = self.connections.stream(sql).await?;
        let mut sink = ChunkedSink::create(&job.path, job.split.sink_options())?;

        let batch_rows = self.config().export_batch_rows;
        let copied = copy_rows(stream.as_mut(), &mut sink, batch_rows, &job.table).await;
        drop(stream);
        let closed = sink.close();

        let rows = copied?;
        Ok(ExportSummary {
            parts: closed?,
            rows,
        })
    }

    /// Export `table` under a generated file name in `temp_dir` and list the files produced
    pub async fn export_source_table_data(
        &mut self,
        temp_dir: &Path,
        tap_id: &str,
        table: &TableName,
        split: SplitOptions,
        where_clause: Option<&str>,
    ) -> Result<Vec<PathBuf>> {
        let path = temp_dir.join(export_filename(tap_id, &table.to_string(), "partialsync"));

        let mut job = ExportJob::new(table.clone(), &path).with_split(split);
        if let Some(where_clause) = where_clause {
            job = job.with_where_clause(where_clause);
        }
        self.export_table(job).await?;

        list_parts(&path)
    }
}
