//! Connection manager for the source server
//!
//! Keeps one buffered session for metadata and status queries and one
//! streaming session for bulk row fetches, both to the same endpoint.

use fastsync_core::{
    ConnectionConfig, ConnectionParams, FastSyncError, QueryResult, Result, RowStream, Session,
    SessionConnector, SessionMode, Value,
};
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Reconnect-and-replay attempts a query gets by default
pub const DEFAULT_RETRIES: u32 = 1;

/// Which session a statement runs on
#[derive(Clone)]
pub enum SessionTarget {
    /// The managed buffered session
    Buffered,
    /// The managed streaming session
    Streaming,
    /// A session opened outside the managed pair, e.g. a short-lived
    /// connection to the primary. Failures on it are never replayed.
    Detached(Arc<dyn Session>),
}

impl SessionTarget {
    fn label(&self) -> &'static str {
        match self {
            SessionTarget::Buffered => "buffered",
            SessionTarget::Streaming => "streaming",
            SessionTarget::Detached(_) => "detached",
        }
    }
}

impl std::fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The live session pair
#[derive(Clone)]
pub struct ConnectionHandle {
    buffered: Arc<dyn Session>,
    streaming: Arc<dyn Session>,
    is_replica: bool,
}

impl ConnectionHandle {
    pub fn is_replica(&self) -> bool {
        self.is_replica
    }
}

/// Manages the sessions to one MySQL-compatible source.
///
/// Every statement goes through [`ConnectionManager::query_with`] or
/// [`ConnectionManager::stream_with`], which close and reopen both sessions
/// and replay the statement when it fails for connectivity reasons.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn SessionConnector>,
    handle: Option<ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            config,
            connector,
            handle: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Resolve the endpoint parameters, see [`ConnectionConfig::connection_params`]
    pub fn connection_params(&self, prioritize_primary: bool) -> (ConnectionParams, bool) {
        self.config.connection_params(prioritize_primary)
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the sessions point at a replica
    pub fn is_replica(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_replica,
            None => self.config.connection_params(false).1,
        }
    }

    /// Open the buffered and streaming sessions and run the session statements
    #[tracing::instrument(skip(self))]
    pub async fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            self.close(true).await;
        }

        let (params, is_replica) = self.config.connection_params(false);
        tracing::info!(host = %params.host, port = params.port, is_replica, "opening connections");

        let buffered = self.connector.connect(&params, SessionMode::Buffered).await?;
        let streaming = match self.connector.connect(&params, SessionMode::Streaming).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = buffered.close().await {
                    tracing::debug!(error = %close_err, "failed to close buffered session");
                }
                return Err(e);
            }
        };

        self.handle = Some(ConnectionHandle {
            buffered,
            streaming,
            is_replica,
        });
        self.run_session_sqls().await
    }

    /// Run the configured session statements on both sessions.
    ///
    /// Statements the server rejects are reported as warnings and skipped.
    async fn run_session_sqls(&self) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };

        let mut warnings = Vec::new();
        for sql in &self.config.session_sqls {
            for session in [&handle.buffered, &handle.streaming] {
                tracing::info!(sql = %sql, "Running query");
                match session.query(sql, &[]).await {
                    Ok(_) => {}
                    Err(FastSyncError::Query(msg)) => {
                        tracing::debug!(sql = %sql, error = %msg, "session statement rejected");
                        warnings.push(format!("Could not set session variable: {}", sql));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !warnings.is_empty() {
            tracing::warn!(
                "Encountered non-fatal errors when configuring session that could impact performance:"
            );
            for warning in &warnings {
                tracing::warn!("{}", warning);
            }
        }
        Ok(())
    }

    /// Close both sessions, returning the first failure
    pub async fn try_close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let buffered = handle.buffered.close().await;
        let streaming = handle.streaming.close().await;
        buffered.and(streaming)
    }

    /// Close both sessions. Failures are logged unless `silent` is set.
    pub async fn close(&mut self, silent: bool) {
        if let Err(e) = self.try_close().await {
            if !silent {
                tracing::error!(error = %e, "failed to close connections");
                tracing::info!("Connections seem to be already closed.");
            }
        }
    }

    /// Open a standalone buffered session, outside the managed pair.
    ///
    /// The caller owns the session and must close it.
    #[tracing::instrument(skip(self))]
    pub async fn open_detached(&self, prioritize_primary: bool) -> Result<Arc<dyn Session>> {
        let (params, _) = self.config.connection_params(prioritize_primary);
        tracing::debug!(host = %params.host, port = params.port, "opening detached session");
        self.connector.connect(&params, SessionMode::Buffered).await
    }

    /// Run a statement on the buffered session
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.query_with(&SessionTarget::Buffered, sql, &[], DEFAULT_RETRIES)
            .await
    }

    /// Run a statement with bound `?` parameters on the buffered session
    pub async fn query_params(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.query_with(&SessionTarget::Buffered, sql, params, DEFAULT_RETRIES)
            .await
    }

    /// Run a statement and buffer its rows.
    ///
    /// A connectivity failure on a managed session closes and reopens both
    /// sessions and replays the statement, at most `retries` times.
    pub async fn query_with(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        params: &[Value],
        retries: u32,
    ) -> Result<QueryResult> {
        tracing::info!(sql = %sql, target = target.label(), "Running query");

        let mut retries_remaining = retries;
        loop {
            let attempt = match self.session_for(target) {
                Ok(session) => session.query(sql, params).await,
                Err(err) => Err(err),
            };
            match attempt {
                Ok(result) => return Ok(result),
                Err(err) => {
                    self.recover(target, err, retries_remaining).await?;
                    retries_remaining -= 1;
                }
            }
        }
    }

    /// Run a statement on the streaming session and return a cursor over its rows
    pub async fn stream(&mut self, sql: &str) -> Result<Box<dyn RowStream>> {
        self.stream_with(&SessionTarget::Streaming, sql, DEFAULT_RETRIES)
            .await
    }

    /// Start a streamed statement, with the same replay policy as `query_with`.
    ///
    /// Only starting the statement is replayed; a failure while consuming the
    /// returned stream is the caller's to handle.
    pub async fn stream_with(
        &mut self,
        target: &SessionTarget,
        sql: &str,
        retries: u32,
    ) -> Result<Box<dyn RowStream>> {
        tracing::info!(sql = %sql, target = target.label(), "Running query");

        let mut retries_remaining = retries;
        loop {
            let attempt = match self.session_for(target) {
                Ok(session) => session.query_stream(sql).await,
                Err(err) => Err(err),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    self.recover(target, err, retries_remaining).await?;
                    retries_remaining -= 1;
                }
            }
        }
    }

    /// The session for `target`; missing managed sessions count as a dropped
    /// connection so the caller's recovery opens them.
    fn session_for(&self, target: &SessionTarget) -> Result<Arc<dyn Session>> {
        if let SessionTarget::Detached(session) = target {
            return Ok(session.clone());
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| FastSyncError::Connection("connections are not open".into()))?;
        Ok(match target {
            SessionTarget::Streaming => handle.streaming.clone(),
            _ => handle.buffered.clone(),
        })
    }

    /// Decide whether a failed statement gets replayed.
    ///
    /// Returns `Ok` after reopening the sessions, or the error to surface.
    async fn recover(
        &mut self,
        target: &SessionTarget,
        err: FastSyncError,
        retries_remaining: u32,
    ) -> Result<()> {
        if !err.is_connectivity() {
            return Err(err);
        }

        tracing::error!(
            error = %err,
            retries_remaining,
            target = target.label(),
            "Exception happened during running a query"
        );
        if retries_remaining == 0 || matches!(target, SessionTarget::Detached(_)) {
            return Err(err);
        }

        tracing::warn!("Reopening the connections.");
        self.close(true).await;
        self.open().await?;
        tracing::info!("Retrying to run a query.");
        Ok(())
    }
}
