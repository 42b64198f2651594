//! TOML configuration file
//!
//! ```toml
//! tap_id = "mysql_sales"
//!
//! [source]
//! host = "db-primary"
//! user = "etl"
//! replica_host = "db-replica"
//! use_gtid = true
//! engine = "mariadb"
//!
//! [target]
//! split_large_files = true
//! split_file_max_chunks = 10
//! ```

use anyhow::Context;
use fastsync_core::ConnectionConfig;
use fastsync_tap_mysql::SplitOptions;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_TAP_ID: &str = "fastsync";

#[derive(Debug, Deserialize)]
pub struct FastSyncConfig {
    #[serde(default = "default_tap_id")]
    pub tap_id: String,
    pub source: ConnectionConfig,
    #[serde(default)]
    pub target: SplitOptions,
}

fn default_tap_id() -> String {
    DEFAULT_TAP_ID.to_string()
}

impl FastSyncConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastsync_core::Engine;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = FastSyncConfig::parse(
            r#"
            [source]
            host = "db"
            user = "etl"
            "#,
        )
        .unwrap();

        assert_eq!(config.tap_id, "fastsync");
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.export_batch_rows, 50000);
        assert_eq!(config.source.session_sqls.len(), 4);
        assert_eq!(config.target, SplitOptions::default());
    }

    #[test]
    fn test_full_config() {
        let config = FastSyncConfig::parse(
            r#"
            tap_id = "mysql_sales"

            [source]
            host = "db-primary"
            port = 3307
            user = "etl"
            password = "secret"
            replica_host = "db-replica"
            use_gtid = true
            engine = "mariadb"
            session_sqls = []

            [target]
            split_large_files = true
            split_file_chunk_size_mb = 250
            compress = false
            "#,
        )
        .unwrap();

        assert_eq!(config.tap_id, "mysql_sales");
        assert!(config.source.has_replica());
        assert_eq!(config.source.engine, Engine::Mariadb);
        assert!(config.source.session_sqls.is_empty());
        assert_eq!(
            config.target,
            SplitOptions {
                split_large_files: true,
                split_file_chunk_size_mb: 250,
                split_file_max_chunks: 20,
                compress: false,
            }
        );
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_missing_source_is_rejected() {
        assert!(FastSyncConfig::parse("tap_id = \"x\"").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = FastSyncConfig::load(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
