//! Connections: one execution interface over a pooled handle or a pinned transaction.
//!
//! A pooled connection may be shared freely between tasks; each statement runs on
//! whichever physical connection the pool hands out. A transaction connection owns
//! exactly one physical connection from `begin_transaction` until `commit` or
//! `rollback`, and is meant to be driven by a single owner.
//!
//! Every statement overwrites the connection's last-statement slot. The slot is a
//! debugging aid; concurrent statements on a shared pooled connection race on it.

use crate::config::{DatabaseConfig, DatabaseType};
use crate::db::executor;
use crate::db::pool::{DbPool, log_connected};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{ExecResult, Rows, Statement, Value};
use crate::query::{Builder, Grammar};
use sqlx::pool::PoolConnection;
use sqlx::{MySql, MySqlConnection, Sqlite, SqliteConnection};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const MYSQL_BEGIN: &[&str] = &[
    "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
    "START TRANSACTION",
];
// SQLite transactions are always serializable; IMMEDIATE takes the write lock up front.
const SQLITE_BEGIN: &[&str] = &["BEGIN IMMEDIATE"];
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Per-connection statement policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Log every statement's debug JSON at `info`.
    pub trace_statements: bool,
    /// Log statements at least this slow at `warn`.
    pub slow_statement_threshold: Option<Duration>,
    /// Fail statements that take longer than this with `DbError::Timeout`.
    pub statement_timeout: Option<Duration>,
}

/// A physical connection reserved for one transaction.
enum Pinned {
    MySql(PoolConnection<MySql>),
    SQLite(PoolConnection<Sqlite>),
}

impl Pinned {
    async fn run(&mut self, sql: &str) -> DbResult<()> {
        match self {
            Pinned::MySql(conn) => executor::mysql::run_raw(&mut **conn, sql).await,
            Pinned::SQLite(conn) => executor::sqlite::run_raw(&mut **conn, sql).await,
        }
    }

    /// Send COMMIT or ROLLBACK, then hand the connection back to the pool.
    ///
    /// If the statement fails the transaction state is unknown, so the
    /// connection is closed instead of returned.
    async fn end(mut self, sql: &'static str) -> DbResult<()> {
        match self.run(sql).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn discard(self) {
        match self {
            Pinned::MySql(conn) => drop(conn.detach()),
            Pinned::SQLite(conn) => drop(conn.detach()),
        }
    }
}

enum Handle {
    Pool(DbPool),
    /// `None` once the transaction has been committed or rolled back.
    Transaction(tokio::sync::Mutex<Option<Pinned>>),
}

/// Records elapsed time into the last-statement slot when finished or dropped.
struct StatementTimer<'a> {
    slot: &'a Mutex<Statement>,
    start: Instant,
    recorded: bool,
}

impl StatementTimer<'_> {
    fn record(&self) -> Statement {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.cost_time = self.start.elapsed();
        slot.clone()
    }

    fn finish(mut self) -> Statement {
        self.recorded = true;
        self.record()
    }
}

impl Drop for StatementTimer<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
        }
    }
}

pub struct Connection {
    label: String,
    driver: DatabaseType,
    handle: Handle,
    grammar: Grammar,
    options: ConnectionOptions,
    server_version: Option<String>,
    last_statement: Mutex<Statement>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("driver", &self.driver)
            .field("transaction", &self.is_transaction())
            .field("grammar", &self.grammar)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a pooled connection to the server described by `config`.
    ///
    /// `label` names the connection in logs (the registry uses its cache key).
    /// The config's statement timeout applies unless `options` sets one.
    pub async fn open(
        label: impl Into<String>,
        config: &DatabaseConfig,
        mut options: ConnectionOptions,
    ) -> DbResult<Self> {
        let label = label.into();
        if options.statement_timeout.is_none() {
            options.statement_timeout = config.statement_timeout();
        }
        let pool = DbPool::connect(config).await?;
        let server_version = pool.server_version().await;
        log_connected(&label, &pool, server_version.as_deref());

        let grammar = Grammar::default()
            .with_table_prefix(config.table_prefix.clone().unwrap_or_default());
        let mut connection = Self::from_pool(label, pool, grammar, options);
        connection.server_version = server_version;
        Ok(connection)
    }

    /// Wrap an existing pool.
    pub fn from_pool(
        label: impl Into<String>,
        pool: DbPool,
        grammar: Grammar,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            label: label.into(),
            driver: pool.db_type(),
            handle: Handle::Pool(pool),
            grammar,
            options,
            server_version: None,
            last_statement: Mutex::new(Statement::default()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn driver(&self) -> DatabaseType {
        self.driver
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.handle, Handle::Transaction(_))
    }

    /// The most recent statement run on this connection, with its elapsed time.
    pub fn last_statement(&self) -> Statement {
        self.last_statement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A fresh builder bound to this connection.
    pub fn new_query(&self) -> Builder<'_> {
        Builder::bound(self, self.grammar.clone())
    }

    /// Shorthand for `new_query().table(name)`.
    pub fn table(&self, name: impl Into<String>) -> Builder<'_> {
        self.new_query().table(name)
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    /// Run a write statement.
    pub async fn execute(&self, sql: &str, args: Vec<Value>) -> DbResult<ExecResult> {
        let timer = self.start_statement(sql, &args);
        let result = self.with_timeout(self.dispatch_execute(sql, &args)).await;
        self.complete(timer, result)
    }

    /// Run a query and decode every row.
    pub async fn query(&self, sql: &str, args: Vec<Value>) -> DbResult<Rows> {
        let timer = self.start_statement(sql, &args);
        let result = self.with_timeout(self.dispatch_fetch(sql, &args)).await;
        self.complete(timer, result)
    }

    /// Run one INSERT template once per argument row on a single physical connection.
    ///
    /// The statement is prepared before the first row. On failure the ids already
    /// produced are returned inside [`DbError::MultiInsert`]; rows are only
    /// atomic if this connection is a transaction.
    pub async fn multi_insert(&self, sql: &str, rows: Vec<Vec<Value>>) -> DbResult<Vec<i64>> {
        match &self.handle {
            Handle::Pool(pool) => match pool {
                DbPool::MySql(p) => {
                    let mut conn = p.acquire().await.map_err(DbError::from)?;
                    self.insert_rows_mysql(&mut conn, sql, &rows).await
                }
                DbPool::SQLite(p) => {
                    let mut conn = p.acquire().await.map_err(DbError::from)?;
                    self.insert_rows_sqlite(&mut conn, sql, &rows).await
                }
            },
            Handle::Transaction(slot) => {
                let mut pinned = slot.lock().await;
                match pinned.as_mut().ok_or(DbError::TransactionClosed)? {
                    Pinned::MySql(conn) => self.insert_rows_mysql(conn, sql, &rows).await,
                    Pinned::SQLite(conn) => self.insert_rows_sqlite(conn, sql, &rows).await,
                }
            }
        }
    }

    async fn insert_rows_mysql(
        &self,
        conn: &mut MySqlConnection,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> DbResult<Vec<i64>> {
        let timer = self.start_statement(sql, &[]);
        let prepared = executor::mysql::prepare(&mut *conn, sql).await;
        self.complete(timer, prepared)
            .map_err(|e| Self::partial_insert(Vec::new(), e))?;

        let mut ids = Vec::with_capacity(rows.len());
        for args in rows {
            let timer = self.start_statement(sql, args);
            let result = self
                .with_timeout(executor::mysql::execute(&mut *conn, sql, args))
                .await;
            match self.complete(timer, result) {
                Ok(r) => ids.push(r.last_insert_id),
                Err(e) => return Err(Self::partial_insert(ids, e)),
            }
        }
        Ok(ids)
    }

    async fn insert_rows_sqlite(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        rows: &[Vec<Value>],
    ) -> DbResult<Vec<i64>> {
        let timer = self.start_statement(sql, &[]);
        let prepared = executor::sqlite::prepare(&mut *conn, sql).await;
        self.complete(timer, prepared)
            .map_err(|e| Self::partial_insert(Vec::new(), e))?;

        let mut ids = Vec::with_capacity(rows.len());
        for args in rows {
            let timer = self.start_statement(sql, args);
            let result = self
                .with_timeout(executor::sqlite::execute(&mut *conn, sql, args))
                .await;
            match self.complete(timer, result) {
                Ok(r) => ids.push(r.last_insert_id),
                Err(e) => return Err(Self::partial_insert(ids, e)),
            }
        }
        Ok(ids)
    }

    fn partial_insert(inserted_ids: Vec<i64>, source: DbError) -> DbError {
        warn!(inserted = inserted_ids.len(), error = %source, "Multi-insert stopped early");
        DbError::MultiInsert {
            inserted_ids,
            source: Box::new(source),
        }
    }

    async fn dispatch_execute(&self, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        match &self.handle {
            Handle::Pool(pool) => impl_db_dispatch!(pool, {
                MySql(p) => executor::mysql::execute(p, sql, args).await,
                SQLite(p) => executor::sqlite::execute(p, sql, args).await,
            }),
            Handle::Transaction(slot) => {
                let mut pinned = slot.lock().await;
                match pinned.as_mut().ok_or(DbError::TransactionClosed)? {
                    Pinned::MySql(conn) => executor::mysql::execute(&mut **conn, sql, args).await,
                    Pinned::SQLite(conn) => executor::sqlite::execute(&mut **conn, sql, args).await,
                }
            }
        }
    }

    async fn dispatch_fetch(&self, sql: &str, args: &[Value]) -> DbResult<Rows> {
        match &self.handle {
            Handle::Pool(pool) => impl_db_dispatch!(pool, {
                MySql(p) => executor::mysql::fetch(p, sql, args).await,
                SQLite(p) => executor::sqlite::fetch(p, sql, args).await,
            }),
            Handle::Transaction(slot) => {
                let mut pinned = slot.lock().await;
                match pinned.as_mut().ok_or(DbError::TransactionClosed)? {
                    Pinned::MySql(conn) => executor::mysql::fetch(&mut **conn, sql, args).await,
                    Pinned::SQLite(conn) => executor::sqlite::fetch(&mut **conn, sql, args).await,
                }
            }
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        match self.options.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| DbError::timeout("statement execution", limit))?,
            None => fut.await,
        }
    }

    /// Record the statement as the connection's last and start its clock.
    fn start_statement(&self, sql: &str, args: &[Value]) -> StatementTimer<'_> {
        {
            let mut slot = self
                .last_statement
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Statement::new(sql, args.to_vec());
        }
        StatementTimer {
            slot: &self.last_statement,
            start: Instant::now(),
            recorded: false,
        }
    }

    /// Stop the clock, log per policy, and attach the statement to driver errors.
    fn complete<T>(&self, timer: StatementTimer<'_>, result: DbResult<T>) -> DbResult<T> {
        let statement = timer.finish();
        match result {
            Ok(value) => {
                self.log_statement(&statement);
                Ok(value)
            }
            Err(DbError::TransactionClosed) => Err(DbError::TransactionClosed),
            Err(e) => {
                error!(
                    connection = %self.label,
                    statement = %statement.to_json(),
                    error = %e,
                    "Statement failed"
                );
                Err(DbError::statement(e, statement))
            }
        }
    }

    fn log_statement(&self, statement: &Statement) {
        let slow = self
            .options
            .slow_statement_threshold
            .is_some_and(|threshold| statement.cost_time >= threshold);
        if slow {
            warn!(
                connection = %self.label,
                statement = %statement.to_json(),
                "Slow statement"
            );
        } else if self.options.trace_statements {
            info!(
                connection = %self.label,
                statement = %statement.to_json(),
                "Statement executed"
            );
        }
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    /// Pin one physical connection and start a serializable transaction on it.
    ///
    /// On a connection that is already a transaction this returns the same connection.
    pub async fn begin_transaction(self: &Arc<Self>) -> DbResult<Arc<Connection>> {
        let pool = match &self.handle {
            Handle::Transaction(_) => return Ok(Arc::clone(self)),
            Handle::Pool(pool) => pool,
        };

        let mut pinned = match pool {
            DbPool::MySql(p) => Pinned::MySql(p.acquire().await.map_err(DbError::from)?),
            DbPool::SQLite(p) => Pinned::SQLite(p.acquire().await.map_err(DbError::from)?),
        };
        let begin = match pinned {
            Pinned::MySql(_) => MYSQL_BEGIN,
            Pinned::SQLite(_) => SQLITE_BEGIN,
        };
        for sql in begin {
            if let Err(e) = pinned.run(sql).await {
                pinned.discard();
                return Err(DbError::transaction(format!(
                    "Failed to begin transaction: {}",
                    e
                )));
            }
        }

        info!(connection = %self.label, "Transaction started");

        Ok(Arc::new(Connection {
            label: self.label.clone(),
            driver: self.driver,
            handle: Handle::Transaction(tokio::sync::Mutex::new(Some(pinned))),
            grammar: self.grammar.clone(),
            options: self.options.clone(),
            server_version: self.server_version.clone(),
            last_statement: Mutex::new(Statement::default()),
        }))
    }

    /// Commit. The connection is closed afterwards whether or not this succeeds.
    pub async fn commit(&self) -> DbResult<()> {
        self.end_transaction(COMMIT).await
    }

    /// Roll back. The connection is closed afterwards whether or not this succeeds.
    pub async fn rollback(&self) -> DbResult<()> {
        self.end_transaction(ROLLBACK).await
    }

    async fn end_transaction(&self, sql: &'static str) -> DbResult<()> {
        let Handle::Transaction(slot) = &self.handle else {
            return Err(DbError::NotInTransaction);
        };
        let pinned = slot.lock().await.take().ok_or(DbError::TransactionClosed)?;
        pinned.end(sql).await.map_err(|e| {
            DbError::transaction(format!("{} failed: {}", sql, e))
        })?;
        info!(connection = %self.label, outcome = sql, "Transaction finished");
        Ok(())
    }

    /// Release resources: closes the pool of a pooled connection, or rolls back an
    /// open transaction.
    pub async fn close(&self) -> DbResult<()> {
        match &self.handle {
            Handle::Pool(pool) => {
                pool.close().await;
                debug!(connection = %self.label, "Pool closed");
                Ok(())
            }
            Handle::Transaction(slot) => match slot.lock().await.take() {
                Some(pinned) => {
                    warn!(connection = %self.label, "Closing open transaction; rolling back");
                    pinned.end(ROLLBACK).await
                }
                None => Ok(()),
            },
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Handle::Transaction(slot) = &mut self.handle else {
            return;
        };
        let Some(pinned) = slot.get_mut().take() else {
            return;
        };

        warn!(
            connection = %self.label,
            "Transaction dropped without commit or rollback; rolling back"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let label = self.label.clone();
                runtime.spawn(async move {
                    if let Err(e) = pinned.end(ROLLBACK).await {
                        warn!(connection = %label, error = %e, "Rollback on drop failed");
                    }
                });
            }
            // No runtime to send ROLLBACK on; closing the socket makes the server roll back.
            Err(_) => pinned.discard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;

    async fn sqlite_connection(dir: &tempfile::TempDir) -> Arc<Connection> {
        let path = dir.path().join("conn.db");
        let config = DatabaseConfig::sqlite(path.to_string_lossy());
        let conn = Connection::open("test", &config, ConnectionOptions::default())
            .await
            .unwrap();
        conn.execute(
            "CREATE TABLE video (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE, views INTEGER)",
            Vec::new(),
        )
        .await
        .unwrap();
        Arc::new(conn)
    }

    #[tokio::test]
    async fn test_execute_records_last_statement() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;

        let result = conn
            .execute(
                "INSERT INTO video (name, views) VALUES (?, ?)",
                vec!["Mike".into(), 3.into()],
            )
            .await
            .unwrap();
        assert_eq!(result.last_insert_id, 1);

        let last = conn.last_statement();
        assert_eq!(last.sql, "INSERT INTO video (name, views) VALUES (?, ?)");
        assert_eq!(last.render(), r#"INSERT INTO video (name, views) VALUES ("Mike", 3)"#);
        assert!(last.cost_time > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_failed_statement_carries_statement() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;

        let err = conn
            .query("SELECT * FROM missing WHERE id=?", vec![5.into()])
            .await
            .unwrap_err();
        let statement = err.last_statement().unwrap();
        assert_eq!(statement.render(), "SELECT * FROM missing WHERE id=5");
        assert_eq!(conn.last_statement().sql, "SELECT * FROM missing WHERE id=?");
    }

    #[tokio::test]
    async fn test_builder_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;
        for (name, views) in [("a", 1), ("b", 5), ("c", 9)] {
            conn.execute(
                "INSERT INTO video (name, views) VALUES (?, ?)",
                vec![name.into(), views.into()],
            )
            .await
            .unwrap();
        }

        let rows = conn
            .table("video")
            .where_op("views", ">", 2)
            .order_by("views", Direction::Desc)
            .get(&["name"])
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![serde_json::json!("c"), serde_json::json!("b")]);

        let first = conn.table("video").where_eq("name", "a").first(&[]).await.unwrap();
        assert_eq!(first.unwrap()["views"], 1);
        assert_eq!(conn.last_statement().sql, "SELECT * FROM video WHERE name=? LIMIT 1");

        let deleted = conn.table("video").where_eq("name", "a").delete().await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_commit_and_rollback_are_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;

        let tx = conn.begin_transaction().await.unwrap();
        assert!(tx.is_transaction());
        assert!(Arc::ptr_eq(&tx, &tx.begin_transaction().await.unwrap()));

        tx.execute("INSERT INTO video (name) VALUES (?)", vec!["kept".into()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(tx.commit().await, Err(DbError::TransactionClosed)));
        assert!(matches!(tx.rollback().await, Err(DbError::TransactionClosed)));
        assert!(matches!(
            tx.execute("SELECT 1", Vec::new()).await,
            Err(DbError::TransactionClosed)
        ));

        let tx = conn.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO video (name) VALUES (?)", vec!["dropped".into()])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let rows = conn.query("SELECT name FROM video", Vec::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0]["name"], "kept");
    }

    #[tokio::test]
    async fn test_commit_on_pooled_connection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;
        assert!(matches!(conn.commit().await, Err(DbError::NotInTransaction)));
        assert!(matches!(conn.rollback().await, Err(DbError::NotInTransaction)));
    }

    #[tokio::test]
    async fn test_multi_insert_collects_ids_and_stops_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let conn = sqlite_connection(&dir).await;
        let sql = "INSERT INTO video (name) VALUES (?)";

        let ids = conn
            .multi_insert(sql, vec![vec!["x".into()], vec!["y".into()]])
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);

        let err = conn
            .multi_insert(
                sql,
                vec![vec!["z".into()], vec!["x".into()], vec!["w".into()]],
            )
            .await
            .unwrap_err();
        match err {
            DbError::MultiInsert { inserted_ids, source } => {
                assert_eq!(inserted_ids, vec![3]);
                assert!(matches!(*source, DbError::Statement { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(conn.last_statement().args, vec![Value::from("x")]);
    }

    #[tokio::test]
    async fn test_statement_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.db");
        let config = DatabaseConfig::sqlite(path.to_string_lossy());
        let options = ConnectionOptions {
            statement_timeout: Some(Duration::from_millis(1)),
            ..ConnectionOptions::default()
        };
        let conn = Connection::open("slow", &config, options).await.unwrap();
        let err = conn
            .query(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000000) SELECT count(*) FROM n",
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Statement { ref source, .. }
                if matches!(**source, DbError::Timeout { limit, .. } if limit == Duration::from_millis(1))
        ));
        assert!(err.to_string().contains("exceeded 1ms"));
    }
}
