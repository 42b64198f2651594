//! Tests for the connection manager

use super::*;
use async_trait::async_trait;
use fastsync_core::{Row, VecRowStream};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("fastsync=debug"))
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// State shared by the connector and every session it hands out
#[derive(Default)]
struct MockServer {
    connect_count: AtomicU32,
    close_count: AtomicU32,
    /// Connectivity failures still to inject into non-session statements
    pending_failures: AtomicU32,
    fail_close: AtomicBool,
    /// Connect attempts still to refuse
    refused_connects: AtomicU32,
    rejected: Vec<String>,
    statements: Mutex<Vec<(String, SessionMode, String)>>,
}

impl MockServer {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn rejecting(sqls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            rejected: sqls.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    fn fail_next(&self, failures: u32) {
        self.pending_failures.store(failures, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn connects(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    fn statements_on(&self, mode: SessionMode) -> Vec<String> {
        self.statements
            .lock()
            .iter()
            .filter(|(_, m, _)| *m == mode)
            .map(|(_, _, sql)| sql.clone())
            .collect()
    }

    fn hosts(&self) -> Vec<String> {
        self.statements
            .lock()
            .iter()
            .map(|(host, _, _)| host.clone())
            .collect()
    }
}

struct MockSession {
    host: String,
    mode: SessionMode,
    server: Arc<MockServer>,
}

impl MockSession {
    fn run(&self, sql: &str) -> Result<QueryResult> {
        self.server
            .statements
            .lock()
            .push((self.host.clone(), self.mode, sql.to_string()));

        if self.server.rejected.iter().any(|r| r == sql) {
            return Err(FastSyncError::Query(format!("Unknown system variable in '{}'", sql)));
        }
        if sql.starts_with("SET ") {
            return Ok(QueryResult::empty());
        }
        if self.server.should_fail() {
            return Err(FastSyncError::Connection("Lost connection to MySQL server".into()));
        }
        Ok(QueryResult::from_rows(vec![Row::from_pairs([(
            "one",
            Value::Int64(1),
        )])]))
    }
}

#[async_trait]
impl Session for MockSession {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.run(sql)
    }

    async fn query_stream(&self, sql: &str) -> Result<Box<dyn RowStream>> {
        Ok(Box::new(VecRowStream::from(self.run(sql)?)))
    }

    async fn close(&self) -> Result<()> {
        self.server.close_count.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(FastSyncError::Connection("already closed".into()));
        }
        Ok(())
    }
}

struct MockConnector {
    server: Arc<MockServer>,
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        mode: SessionMode,
    ) -> Result<Arc<dyn Session>> {
        self.server.connect_count.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .server
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(FastSyncError::Connection("Can't connect to MySQL server".into()));
        }
        Ok(Arc::new(MockSession {
            host: params.host.clone(),
            mode,
            server: self.server.clone(),
        }))
    }
}

fn manager(config: ConnectionConfig, server: &Arc<MockServer>) -> ConnectionManager {
    initialize_logging();
    ConnectionManager::new(
        config,
        Arc::new(MockConnector {
            server: server.clone(),
        }),
    )
}

fn primary_config() -> ConnectionConfig {
    ConnectionConfig::new("db-primary", 3306, "etl")
}

#[tokio::test]
async fn test_open_runs_session_sqls_on_both_sessions() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config(), &server);
    mgr.open().await.unwrap();

    assert_eq!(server.connects(), 2);
    let expected: Vec<String> = fastsync_core::DEFAULT_SESSION_SQLS
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(server.statements_on(SessionMode::Buffered), expected);
    assert_eq!(server.statements_on(SessionMode::Streaming), expected);
    assert!(!mgr.is_replica());
}

#[tokio::test]
async fn test_rejected_session_sql_does_not_abort_open() {
    let server = MockServer::rejecting(&["SET @@session.bogus=1"]);
    let config = primary_config().with_session_sqls([
        "SET @@session.bogus=1",
        "SET @@session.wait_timeout=28800",
    ]);
    let mut mgr = manager(config, &server);

    mgr.open().await.unwrap();
    assert!(mgr.is_open());
    assert_eq!(
        server.statements_on(SessionMode::Streaming),
        vec![
            "SET @@session.bogus=1".to_string(),
            "SET @@session.wait_timeout=28800".to_string()
        ]
    );
}

#[tokio::test]
async fn test_replica_flag_recorded_on_open() {
    let server = MockServer::new();
    let config = primary_config().with_replica("db-replica", None);
    let mut mgr = manager(config, &server);
    mgr.open().await.unwrap();

    assert!(mgr.is_replica());
    assert!(mgr.handle().is_some_and(|h| h.is_replica()));
    assert!(server.hosts().iter().all(|h| h == "db-replica"));
}

#[tokio::test]
async fn test_single_connectivity_failure_reconnects_once() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_next(1);
    let result = mgr.query("SHOW MASTER STATUS").await.unwrap();

    assert_eq!(result.row_count(), 1);
    assert_eq!(server.connects(), 4);
    assert_eq!(server.close_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_retries_left_propagates_without_reconnect() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_next(1);
    let err = mgr
        .query_with(&SessionTarget::Buffered, "SHOW MASTER STATUS", &[], 0)
        .await
        .unwrap_err();

    assert!(err.is_connectivity());
    assert_eq!(server.connects(), 2);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_next(5);
    let err = mgr.query("SELECT 1").await.unwrap_err();

    assert!(err.is_connectivity());
    // one initial open plus exactly one reopen
    assert_eq!(server.connects(), 4);
}

#[tokio::test]
async fn test_query_errors_are_not_retried() {
    let server = MockServer::rejecting(&["SELEC 1"]);
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    let err = mgr.query("SELEC 1").await.unwrap_err();
    assert!(matches!(err, FastSyncError::Query(_)));
    assert_eq!(server.connects(), 2);
}

#[tokio::test]
async fn test_stream_start_is_replayed_on_streaming_session() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_next(1);
    let mut stream = mgr.stream("SELECT `id` FROM `sales`.`orders`").await.unwrap();

    assert_eq!(stream.next_batch(10).await.unwrap().len(), 1);
    assert_eq!(server.statements_on(SessionMode::Streaming).len(), 2);
    assert!(server.statements_on(SessionMode::Buffered).is_empty());
}

#[tokio::test]
async fn test_detached_session_failures_are_not_replayed() {
    let server = MockServer::new();
    let config = primary_config()
        .with_session_sqls(Vec::<String>::new())
        .with_replica("db-replica", Some(3307));
    let mut mgr = manager(config, &server);
    mgr.open().await.unwrap();

    let detached = mgr.open_detached(true).await.unwrap();
    server.fail_next(1);
    let err = mgr
        .query_with(
            &SessionTarget::Detached(detached),
            "select @@server_id as server_id;",
            &[],
            DEFAULT_RETRIES,
        )
        .await
        .unwrap_err();

    assert!(err.is_connectivity());
    assert_eq!(server.connects(), 3);
    assert_eq!(server.hosts(), vec!["db-primary".to_string()]);
}

#[tokio::test]
async fn test_query_before_open_opens_lazily() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);

    let result = mgr.query("SELECT 1").await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert!(mgr.is_open());
}

#[tokio::test]
async fn test_stream_before_open_opens_lazily() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);

    let mut stream = mgr.stream("SELECT * FROM t").await.unwrap();
    assert_eq!(stream.next_batch(10).await.unwrap().len(), 1);
    assert_eq!(server.statements_on(SessionMode::Streaming), vec!["SELECT * FROM t"]);
}

#[tokio::test]
async fn test_failed_reopen_recovers_on_next_query() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_next(1);
    server.refused_connects.store(1, Ordering::SeqCst);
    let err = mgr.query("SELECT 1").await.unwrap_err();
    assert!(err.is_connectivity());
    assert!(!mgr.is_open());

    let result = mgr.query("SELECT 1").await.unwrap();
    assert_eq!(result.row_count(), 1);
    assert!(mgr.is_open());
}

#[tokio::test]
async fn test_close_failures_are_reported_or_silenced() {
    let server = MockServer::new();
    let mut mgr = manager(primary_config().with_session_sqls(Vec::<String>::new()), &server);
    mgr.open().await.unwrap();

    server.fail_close.store(true, Ordering::SeqCst);
    assert!(mgr.try_close().await.is_err());
    // both sessions were still asked to close
    assert_eq!(server.close_count.load(Ordering::SeqCst), 2);
    assert!(!mgr.is_open());

    mgr.open().await.unwrap();
    mgr.close(true).await;
    mgr.close(false).await;
    assert!(!mgr.is_open());
}
