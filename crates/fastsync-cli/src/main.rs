//! `fastsync`: snapshot a MySQL/MariaDB table and capture its replication checkpoint

mod config;
mod logging;
mod type_map;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fastsync_driver_mysql::MySqlConnector;
use fastsync_tap_mysql::{
    DateRenderType, ExportJob, MySqlTap, NumericBound, SanitizeOptions, SplitOptions, TableName,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::FastSyncConfig;
use crate::type_map::PostgresTypeMapper;

#[derive(Parser, Debug)]
#[command(name = "fastsync", version, about)]
struct Cli {
    /// TOML file with `[source]` connection settings and optional `[target]` split options
    #[arg(short, long, env = "FASTSYNC_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "FASTSYNC_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current replication checkpoint as JSON
    Position,
    /// Print the current maximum of an incremental replication key as JSON
    KeyPosition {
        #[arg(long)]
        table: TableName,
        #[arg(long)]
        key: String,
    },
    /// Export a table snapshot to CSV and print the files written
    Export(ExportArgs),
    /// Export a table into a generated file under a temporary directory
    PartialExport {
        #[arg(long)]
        table: TableName,
        #[arg(long)]
        temp_dir: PathBuf,
        #[arg(long = "where")]
        where_clause: Option<String>,
    },
    /// Print the sanitized projection and primary key of a table
    Columns {
        #[arg(long)]
        table: TableName,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Table as `schema.table`
    #[arg(long)]
    table: TableName,
    /// Destination file; parts get a `-partNNN` suffix when splitting
    #[arg(long)]
    path: PathBuf,
    /// Clamp numeric columns to +/- this magnitude
    #[arg(long)]
    max_num: Option<NumericBound>,
    #[arg(long, default_value = "date")]
    date_type: DateRenderType,
    #[arg(long)]
    split: bool,
    #[arg(long)]
    chunk_size_mb: Option<u64>,
    #[arg(long)]
    max_chunks: Option<usize>,
    #[arg(long)]
    no_compress: bool,
    /// Fragment appended after the table name, e.g. "WHERE id > 100"
    #[arg(long = "where")]
    where_clause: Option<String>,
}

impl ExportArgs {
    fn into_job(self, target: SplitOptions) -> ExportJob {
        let mut sanitize = SanitizeOptions::default().with_date_type(self.date_type);
        if let Some(bound) = self.max_num {
            sanitize = sanitize.with_max_num(bound);
        }

        let split = SplitOptions {
            split_large_files: self.split || target.split_large_files,
            split_file_chunk_size_mb: self
                .chunk_size_mb
                .unwrap_or(target.split_file_chunk_size_mb),
            split_file_max_chunks: self.max_chunks.unwrap_or(target.split_file_max_chunks),
            compress: target.compress && !self.no_compress,
        };

        let mut job = ExportJob::new(self.table, self.path)
            .with_sanitize(sanitize)
            .with_split(split);
        if let Some(where_clause) = self.where_clause {
            job = job.with_where_clause(where_clause);
        }
        job
    }
}

async fn run(tap: &mut MySqlTap, config: &FastSyncConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Position => {
            let position = tap.fetch_current_log_pos().await?;
            println!("{}", serde_json::to_string(&position)?);
        }
        Command::KeyPosition { table, key } => {
            let position = tap.fetch_current_incremental_key_pos(&table, &key).await?;
            println!("{}", serde_json::to_string(&position)?);
        }
        Command::Export(args) => {
            let summary = tap.export_table(args.into_job(config.target)).await?;
            tracing::info!(rows = summary.rows, parts = summary.parts.len(), "export finished");
            for part in summary.parts {
                println!("{}", part.display());
            }
        }
        Command::PartialExport {
            table,
            temp_dir,
            where_clause,
        } => {
            let parts = tap
                .export_source_table_data(
                    &temp_dir,
                    &config.tap_id,
                    &table,
                    config.target,
                    where_clause.as_deref(),
                )
                .await?;
            for part in parts {
                println!("{}", part.display());
            }
        }
        Command::Columns { table } => {
            let columns = tap.get_columns(&table, &SanitizeOptions::default()).await?;
            let mapped = tap.map_columns_to_target_types(&table).await?;
            let output = json!({
                "columns": columns,
                "target_columns": mapped.columns,
                "primary_key": mapped.primary_key,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(logging::LoggingConfig {
        json: cli.json_logs,
        include_location: cfg!(debug_assertions),
    })?;

    let config = FastSyncConfig::load(&cli.config)?;
    tracing::debug!(?config, "configuration loaded");

    let mut tap = MySqlTap::new(
        config.source.clone(),
        Arc::new(MySqlConnector),
        Arc::new(PostgresTypeMapper),
    );
    tap.open().await.context("failed to connect to source")?;

    let result = run(&mut tap, &config, cli.command).await;
    tap.close(false).await;
    result
}
