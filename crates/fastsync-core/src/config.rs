//! Connection configuration for a MySQL-compatible source

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_EXPORT_BATCH_ROWS: usize = 50_000;
pub const DEFAULT_PORT: u16 = 3306;

/// Session statements run on every freshly opened session unless overridden
pub const DEFAULT_SESSION_SQLS: [&str; 4] = [
    r#"SET @@session.time_zone="+0:00""#,
    "SET @@session.wait_timeout=28800",
    "SET @@session.net_read_timeout=3600",
    "SET @@session.innodb_lock_wait_timeout=3600",
];

/// Server flavour, which decides the GTID dialect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Mysql,
    Mariadb,
}

impl Engine {
    pub fn is_mariadb(self) -> bool {
        self == Engine::Mariadb
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Mysql => write!(f, "mysql"),
            Engine::Mariadb => write!(f, "mariadb"),
        }
    }
}

/// Source connection settings.
///
/// Every optional knob is resolved to its default during deserialization, so
/// nothing downstream has to re-check for absent values.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default)]
    pub replica_host: Option<String>,
    #[serde(default)]
    pub replica_port: Option<u16>,
    #[serde(default)]
    pub replica_user: Option<String>,
    #[serde(default)]
    pub replica_password: Option<String>,

    /// Statements run on both sessions right after connecting
    #[serde(default = "default_session_sqls")]
    pub session_sqls: Vec<String>,
    /// Rows fetched per round trip while exporting
    #[serde(default = "default_export_batch_rows")]
    pub export_batch_rows: usize,
    /// Checkpoint with a GTID instead of a binlog file/position
    #[serde(default)]
    pub use_gtid: bool,
    #[serde(default)]
    pub engine: Engine,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

fn default_session_sqls() -> Vec<String> {
    DEFAULT_SESSION_SQLS.iter().map(|s| s.to_string()).collect()
}

fn default_export_batch_rows() -> usize {
    DEFAULT_EXPORT_BATCH_ROWS
}

impl ConnectionConfig {
    /// Create a configuration for a primary server with every default applied
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: None,
            charset: default_charset(),
            replica_host: None,
            replica_port: None,
            replica_user: None,
            replica_password: None,
            session_sqls: default_session_sqls(),
            export_batch_rows: DEFAULT_EXPORT_BATCH_ROWS,
            use_gtid: false,
            engine: Engine::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_replica(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.replica_host = Some(host.into());
        self.replica_port = port;
        self
    }

    pub fn with_replica_credentials(
        mut self,
        user: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.replica_user = Some(user.into());
        self.replica_password = password;
        self
    }

    pub fn with_session_sqls<I, S>(mut self, sqls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session_sqls = sqls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_export_batch_rows(mut self, rows: usize) -> Self {
        self.export_batch_rows = rows.max(1);
        self
    }

    pub fn with_gtid(mut self, use_gtid: bool) -> Self {
        self.use_gtid = use_gtid;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn is_mariadb(&self) -> bool {
        self.engine.is_mariadb()
    }

    /// Whether any replica override is configured
    pub fn has_replica(&self) -> bool {
        self.replica_host.is_some()
            || self.replica_port.is_some()
            || self.replica_user.is_some()
            || self.replica_password.is_some()
    }

    /// Resolve the endpoint to connect to.
    ///
    /// Replica fields win over primary fields unless `prioritize_primary` is
    /// set; each replica field falls back to its primary counterpart on its own.
    /// The returned flag is true when the endpoint is a replica.
    pub fn connection_params(&self, prioritize_primary: bool) -> (ConnectionParams, bool) {
        if prioritize_primary || !self.has_replica() {
            return (
                ConnectionParams {
                    host: self.host.clone(),
                    port: self.port,
                    user: self.user.clone(),
                    password: self.password.clone(),
                    charset: self.charset.clone(),
                },
                false,
            );
        }

        (
            ConnectionParams {
                host: self.replica_host.clone().unwrap_or_else(|| self.host.clone()),
                port: self.replica_port.unwrap_or(self.port),
                user: self.replica_user.clone().unwrap_or_else(|| self.user.clone()),
                password: self
                    .replica_password
                    .clone()
                    .or_else(|| self.password.clone()),
                charset: self.charset.clone(),
            },
            true,
        )
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("charset", &self.charset)
            .field("replica_host", &self.replica_host)
            .field("replica_port", &self.replica_port)
            .field("replica_user", &self.replica_user)
            .field(
                "replica_password",
                &self.replica_password.as_ref().map(|_| "***"),
            )
            .field("session_sqls", &self.session_sqls)
            .field("export_batch_rows", &self.export_batch_rows)
            .field("use_gtid", &self.use_gtid)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Resolved parameters for one physical endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub charset: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("charset", &self.charset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn primary() -> ConnectionConfig {
        ConnectionConfig::new("db-primary", 3306, "etl").with_password("secret")
    }

    #[test]
    fn test_primary_only_config_never_reports_replica() {
        let config = primary();
        for prioritize in [false, true] {
            let (params, is_replica) = config.connection_params(prioritize);
            assert!(!is_replica);
            assert_eq!(params.host, "db-primary");
            assert_eq!(params.port, 3306);
            assert_eq!(params.password.as_deref(), Some("secret"));
        }
    }

    #[test]
    fn test_replica_preferred_unless_primary_prioritized() {
        let config = primary()
            .with_replica("db-replica", Some(3307))
            .with_replica_credentials("reader", Some("r-secret".into()));

        let (params, is_replica) = config.connection_params(false);
        assert!(is_replica);
        assert_eq!(params.host, "db-replica");
        assert_eq!(params.port, 3307);
        assert_eq!(params.user, "reader");
        assert_eq!(params.password.as_deref(), Some("r-secret"));

        let (params, is_replica) = config.connection_params(true);
        assert!(!is_replica);
        assert_eq!(params.host, "db-primary");
        assert_eq!(params.port, 3306);
        assert_eq!(params.user, "etl");
        assert_eq!(params.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_partial_replica_fields_fall_back_individually() {
        let config = primary().with_replica("db-replica", None);
        let (params, is_replica) = config.connection_params(false);
        assert!(is_replica);
        assert_eq!(params.host, "db-replica");
        assert_eq!(params.port, 3306);
        assert_eq!(params.user, "etl");
        assert_eq!(params.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            host = "localhost"
            user = "root"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.charset, "utf8");
        assert_eq!(config.export_batch_rows, 50_000);
        assert_eq!(config.session_sqls.len(), 4);
        assert_eq!(config.session_sqls[0], r#"SET @@session.time_zone="+0:00""#);
        assert!(!config.use_gtid);
        assert_eq!(config.engine, Engine::Mysql);
        assert!(!config.has_replica());
    }

    #[test]
    fn test_engine_from_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            host = "localhost"
            user = "root"
            engine = "mariadb"
            use_gtid = true
            session_sqls = []
            "#,
        )
        .unwrap();
        assert!(config.is_mariadb());
        assert!(config.use_gtid);
        assert!(config.session_sqls.is_empty());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = primary().with_replica_credentials("reader", Some("r-secret".into()));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        let (params, _) = config.connection_params(true);
        assert!(!format!("{:?}", params).contains("secret"));
    }
}
