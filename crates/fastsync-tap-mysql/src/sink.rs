//! Chunked, optionally gzip-compressed output files

use fastsync_core::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Rough gzip ratio for delimited text, used to estimate compressed part size
const COMPRESSION_RATIO: f64 = 0.12;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Estimated part size that triggers a rollover
    pub chunk_size_mb: u64,
    /// Maximum number of parts; 0 writes a single file at the destination path
    pub max_chunks: usize,
    pub compress: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            chunk_size_mb: 1000,
            max_chunks: 0,
            compress: true,
        }
    }
}

enum PartWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl PartWriter {
    fn create(path: &Path, compress: bool) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if compress {
            PartWriter::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            PartWriter::Plain(file)
        })
    }

    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            PartWriter::Plain(w) => w.write_all(data),
            PartWriter::Gzip(w) => w.write_all(data),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            PartWriter::Plain(mut w) => w.flush(),
            PartWriter::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Writes records into one file, or into `-partNNN` files when splitting.
///
/// Callers hand over whole records so a part never ends mid-line.
pub struct ChunkedSink {
    path: PathBuf,
    options: SinkOptions,
    writer: Option<PartWriter>,
    parts: Vec<PathBuf>,
    current_bytes: u64,
}

impl ChunkedSink {
    /// Create the sink and its first output file
    pub fn create(path: impl Into<PathBuf>, options: SinkOptions) -> Result<Self> {
        let mut sink = Self {
            path: path.into(),
            options,
            writer: None,
            parts: Vec::new(),
            current_bytes: 0,
        };
        sink.start_part()?;
        Ok(sink)
    }

    fn splitting(&self) -> bool {
        self.options.max_chunks > 0
    }

    fn part_path(&self, number: usize) -> PathBuf {
        if !self.splitting() {
            return self.path.clone();
        }
        let mut name = self.path.clone().into_os_string();
        name.push(format!("-part{:03}", number));
        PathBuf::from(name)
    }

    fn estimated_size(&self) -> u64 {
        if self.options.compress {
            (self.current_bytes as f64 * COMPRESSION_RATIO) as u64
        } else {
            self.current_bytes
        }
    }

    fn should_roll(&self) -> bool {
        self.splitting()
            && self.parts.len() < self.options.max_chunks
            && self.current_bytes > 0
            && self.estimated_size() >= self.options.chunk_size_mb.saturating_mul(MIB)
    }

    fn start_part(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        let path = self.part_path(self.parts.len() + 1);
        tracing::debug!(path = %path.display(), "starting output part");
        self.writer = Some(PartWriter::create(&path, self.options.compress)?);
        self.parts.push(path);
        self.current_bytes = 0;
        Ok(())
    }

    /// Append one or more complete records
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.should_roll() {
            self.start_part()?;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(data)?;
            self.current_bytes += data.len() as u64;
        }
        Ok(())
    }

    /// Finalize the active part and return every part written
    pub fn close(mut self) -> Result<Vec<PathBuf>> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(std::mem::take(&mut self.parts))
    }
}

impl Drop for ChunkedSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to finalize output part");
            }
        }
    }
}
