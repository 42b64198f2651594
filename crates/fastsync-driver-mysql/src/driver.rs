//! MySQL session connector

use async_trait::async_trait;
use fastsync_core::{
    ConnectionParams, FastSyncError, Result, Session, SessionConnector, SessionMode,
};
use mysql_async::{Conn, Opts, OptsBuilder};
use std::sync::Arc;

use crate::MySqlSession;
use crate::connection::classify_error;

/// Opens `MySqlSession`s against a resolved endpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl MySqlConnector {
    pub fn new() -> Self {
        Self
    }

    /// Build driver options for one endpoint.
    ///
    /// The character set is applied with `SET NAMES` as the first statement
    /// of every new connection.
    pub fn build_opts(params: &ConnectionParams) -> Result<Opts> {
        validate_charset(&params.charset)?;

        let mut builder = OptsBuilder::from_opts(Opts::default())
            .ip_or_hostname(params.host.clone())
            .tcp_port(params.port)
            .user(Some(params.user.clone()))
            .prefer_socket(false)
            .init(vec![format!("SET NAMES {}", params.charset)]);
        if let Some(password) = &params.password {
            builder = builder.pass(Some(password.clone()));
        }
        Ok(builder.into())
    }
}

fn validate_charset(charset: &str) -> Result<()> {
    if charset.is_empty() || !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FastSyncError::Configuration(format!(
            "invalid charset {:?}",
            charset
        )));
    }
    Ok(())
}

#[async_trait]
impl SessionConnector for MySqlConnector {
    #[tracing::instrument(skip(self, params), fields(host = %params.host, port = params.port, mode = %mode))]
    async fn connect(
        &self,
        params: &ConnectionParams,
        mode: SessionMode,
    ) -> Result<Arc<dyn Session>> {
        let opts = Self::build_opts(params)?;
        let conn = Conn::new(opts).await.map_err(|e| {
            tracing::error!(error = %e, "failed to connect to MySQL server");
            match classify_error(e) {
                FastSyncError::Query(msg) | FastSyncError::Other(msg) => {
                    FastSyncError::Connection(msg)
                }
                other => other,
            }
        })?;

        tracing::debug!(host = %params.host, port = params.port, "MySQL session opened");
        Ok(Arc::new(MySqlSession::new(conn, mode)))
    }
}
