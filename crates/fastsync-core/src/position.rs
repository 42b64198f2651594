//! Replication checkpoints

use serde::{Deserialize, Serialize};

/// Binlog coordinate schema version written when the server reports none
pub const DEFAULT_BINLOG_VERSION: i64 = 1;

/// Point in the source's change stream at which a snapshot was taken.
///
/// Serializes to the bookmark shape a replication consumer resumes from:
/// `{"gtid": "..."}` or `{"log_file": "...", "log_pos": 0, "version": 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogPosition {
    Gtid {
        #[serde(rename = "gtid")]
        value: String,
    },
    BinlogCoordinate {
        #[serde(rename = "log_file")]
        file: String,
        #[serde(rename = "log_pos")]
        offset: u64,
        version: i64,
    },
}

impl LogPosition {
    pub fn gtid(value: impl Into<String>) -> Self {
        LogPosition::Gtid {
            value: value.into(),
        }
    }

    pub fn binlog(file: impl Into<String>, offset: u64) -> Self {
        LogPosition::BinlogCoordinate {
            file: file.into(),
            offset,
            version: DEFAULT_BINLOG_VERSION,
        }
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogPosition::Gtid { value } => write!(f, "gtid:{}", value),
            LogPosition::BinlogCoordinate { file, offset, .. } => {
                write!(f, "binlog:{}:{}", file, offset)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bookmark_shapes() {
        let gtid = LogPosition::gtid("0-1774983-23");
        assert_eq!(serde_json::to_value(&gtid).unwrap(), json!({"gtid": "0-1774983-23"}));

        let binlog = LogPosition::binlog("binlog.000002", 914);
        assert_eq!(
            serde_json::to_value(&binlog).unwrap(),
            json!({"log_file": "binlog.000002", "log_pos": 914, "version": 1})
        );
    }

    #[test]
    fn test_bookmark_parses_back() {
        let parsed: LogPosition =
            serde_json::from_value(json!({"log_file": "mysql-bin.000010", "log_pos": 4, "version": 1}))
                .unwrap();
        assert_eq!(parsed, LogPosition::binlog("mysql-bin.000010", 4));
        assert_eq!(parsed.to_string(), "binlog:mysql-bin.000010:4");
    }
}
